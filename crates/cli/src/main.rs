use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::Value as Json;
use tether_apply::{apply_merge, diff_summary, LastAppliedStore, DEFAULT_LAST_APPLIED_KEY};
use tracing::{info, warn};

mod input;
mod live;

use input::load_document;

#[derive(Parser, Debug)]
#[command(name = "tetherctl", version, about = "Preview client-side three-way apply")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Yaml)]
    output: Output,

    /// Annotation holding the last-applied snapshot
    #[arg(long = "key", global = true, env = "TETHER_LAST_APPLIED_KEY", default_value = DEFAULT_LAST_APPLIED_KEY)]
    key: String,

    /// Print adds/updates/removes against the observed object to stderr
    #[arg(long = "summary", global = true, action = ArgAction::SetTrue)]
    summary: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Yaml, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Three-way merge of explicit observed, last-applied and desired documents
    Merge {
        #[arg(long = "observed")]
        observed: PathBuf,
        /// Omit when nothing was applied before
        #[arg(long = "last-applied")]
        last_applied: Option<PathBuf>,
        #[arg(long = "desired")]
        desired: PathBuf,
    },
    /// Reconcile step: merge against the snapshot recorded on the observed object
    Apply {
        #[arg(long = "observed")]
        observed: PathBuf,
        #[arg(long = "desired")]
        desired: PathBuf,
        /// Treat an undecodable snapshot as no prior state instead of failing
        #[arg(long = "ignore-bad-snapshot", action = ArgAction::SetTrue)]
        ignore_bad_snapshot: bool,
    },
    /// Inspect or edit the last-applied annotation
    LastApplied {
        #[command(subcommand)]
        command: LastAppliedCommands,
    },
    /// Fetch the observed object from the cluster and preview the merge (never writes)
    Live {
        #[arg(long = "desired")]
        desired: PathBuf,
        /// Namespace (default: from the desired document)
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum LastAppliedCommands {
    /// Print the recorded snapshot (null when none)
    Get { file: PathBuf },
    /// Record a snapshot on an object and print the object
    Set {
        file: PathBuf,
        #[arg(long = "from")]
        from: PathBuf,
    },
    /// Strip the snapshot annotation from a document
    Sanitize { file: PathBuf },
}

fn init_tracing() {
    let env = std::env::var("TETHER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn render(v: &Json, output: Output) -> Result<String> {
    Ok(match output {
        Output::Yaml => serde_yaml::to_string(v)?,
        Output::Json => format!("{}\n", serde_json::to_string_pretty(v)?),
    })
}

fn emit(v: &Json, output: Output) -> Result<()> {
    print!("{}", render(v, output)?);
    Ok(())
}

fn report(enabled: bool, merged: &Json, observed: &Json) {
    if enabled {
        let s = diff_summary(merged, observed);
        eprintln!("{} adds, {} updates, {} removes", s.adds, s.updates, s.removes);
    }
}

fn last_applied_of(store: &LastAppliedStore, observed: &Json, ignore_bad: bool, source: &Path) -> Result<Option<Json>> {
    match store.get(observed) {
        Ok(last) => Ok(last),
        Err(e) if ignore_bad && e.is_serialization() => {
            warn!(error = %e, file = %source.display(), "ignoring undecodable last-applied snapshot");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("reading last-applied snapshot from {}", source.display())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let store = LastAppliedStore::new(cli.key.clone());

    match cli.command {
        Commands::Merge { observed, last_applied, desired } => {
            let observed_doc = load_document(&observed)?;
            let desired_doc = load_document(&desired)?;
            let last_doc = last_applied.as_deref().map(load_document).transpose()?;
            info!(observed = %observed.display(), has_last_applied = last_doc.is_some(), "merge invoked");
            let merged = apply_merge(&observed_doc, last_doc.as_ref(), &desired_doc).context("can't merge desired changes")?;
            report(cli.summary, &merged, &observed_doc);
            emit(&merged, cli.output)?;
        }
        Commands::Apply { observed, desired, ignore_bad_snapshot } => {
            let observed_doc = load_document(&observed)?;
            let desired_doc = load_document(&desired)?;
            let last = last_applied_of(&store, &observed_doc, ignore_bad_snapshot, &observed)?;
            info!(observed = %observed.display(), key = %store.key(), has_last_applied = last.is_some(), "apply invoked");
            let stamped = store.stamp(&desired_doc).context("recording last-applied snapshot")?;
            let merged = apply_merge(&observed_doc, last.as_ref(), &stamped).context("can't merge desired changes")?;
            report(cli.summary, &merged, &observed_doc);
            emit(&merged, cli.output)?;
        }
        Commands::LastApplied { command } => match command {
            LastAppliedCommands::Get { file } => {
                let obj = load_document(&file)?;
                let snapshot = store.get(&obj).with_context(|| format!("reading last-applied snapshot from {}", file.display()))?;
                if snapshot.is_none() {
                    info!(file = %file.display(), key = %store.key(), "no last-applied snapshot recorded");
                }
                emit(&snapshot.unwrap_or(Json::Null), cli.output)?;
            }
            LastAppliedCommands::Set { file, from } => {
                let mut obj = load_document(&file)?;
                let mut snapshot = load_document(&from)?;
                store.sanitize(&mut snapshot);
                store.set(&mut obj, &snapshot).context("recording last-applied snapshot")?;
                emit(&obj, cli.output)?;
            }
            LastAppliedCommands::Sanitize { file } => {
                let mut doc = load_document(&file)?;
                store.sanitize(&mut doc);
                emit(&doc, cli.output)?;
            }
        },
        Commands::Live { desired, namespace } => {
            let desired_doc = load_document(&desired)?;
            let target = live::target_of(&desired_doc, namespace.as_deref())?;
            info!(gvk = ?target.gvk, name = %target.name, ns = ?target.namespace, "live preview invoked");
            let current = live::fetch_observed(&target).await?;
            let last = match &current {
                Some(obj) => store.get(obj).context("reading last-applied snapshot from live object")?,
                None => None,
            };
            let observed_doc = match &current {
                Some(obj) => serde_json::to_value(obj).context("encoding live object")?,
                None => Json::Null,
            };
            let stamped = store.stamp(&desired_doc).context("recording last-applied snapshot")?;
            let merged = apply_merge(&observed_doc, last.as_ref(), &stamped).context("can't merge desired changes")?;
            report(cli.summary, &merged, &observed_doc);
            emit(&merged, cli.output)?;
        }
    }

    Ok(())
}
