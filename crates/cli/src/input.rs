//! Loading documents from files or stdin, with size guards.

use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::Value as Json;

fn max_yaml_bytes() -> usize {
    std::env::var("TETHER_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

fn max_yaml_nodes() -> usize {
    std::env::var("TETHER_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn json_node_budget_exceeded(v: &Json, max: usize) -> bool {
    // Keep a running counter and bail early once past max
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// Parses a YAML (or JSON) document into the JSON document model.
pub fn parse_document(text: &str) -> Result<Json> {
    parse_document_with(text, max_yaml_bytes(), max_yaml_nodes())
}

fn parse_document_with(text: &str, max_bytes: usize, max_nodes: usize) -> Result<Json> {
    if text.len() > max_bytes {
        return Err(anyhow!("document too large (>{} bytes)", max_bytes));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(text).context("parsing YAML")?;
    let json = serde_json::to_value(val).context("converting YAML to JSON")?;
    if json_node_budget_exceeded(&json, max_nodes) {
        return Err(anyhow!("document too complex (>{} nodes)", max_nodes));
    }
    Ok(json)
}

/// Reads `path` (`-` for stdin) and parses it.
pub fn load_document(path: &Path) -> Result<Json> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    parse_document(&text).with_context(|| format!("loading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_and_json_both_parse() {
        let y = parse_document("kind: ConfigMap\ndata:\n  k: v\n").unwrap();
        let j = parse_document(r#"{"kind": "ConfigMap", "data": {"k": "v"}}"#).unwrap();
        assert_eq!(y, j);
    }

    #[test]
    fn guards_reject_oversized_input() {
        let e1 = parse_document_with("a: 1\nb: 2\n", 4, 100).unwrap_err().to_string();
        assert!(e1.contains("too large"), "e1={}", e1);

        let e2 = parse_document_with("a: [1, 2, 3]\n", 1_000, 3).unwrap_err().to_string();
        assert!(e2.contains("too complex"), "e2={}", e2);

        assert!(parse_document_with("a: [1, 2, 3]\n", 1_000, 6).is_ok());
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let e = parse_document_with("a: [1, 2\n", 1_000, 100).unwrap_err().to_string();
        assert!(e.contains("parsing YAML"), "e={}", e);
    }
}
