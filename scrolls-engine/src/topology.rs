//! Topology files: where to find relays

use serde_json::Value;
use std::path::Path;

use crate::error::Error;

const DEFAULT_PORT: u16 = 3001;

/// Extracts `(host, port)` endpoints from a topology JSON document.
///
/// Supports the common layouts: `Producers`/`producers` and
/// `AccessPoints`/`accessPoints`, with hosts under `addr`, `address` or
/// `host`. Duplicate endpoints are coalesced in first-seen order.
pub fn parse_topology(doc: &Value) -> Vec<(String, u16)> {
    let mut out: Vec<(String, u16)> = Vec::new();

    let groups = [
        doc.get("Producers"),
        doc.get("producers"),
        doc.get("AccessPoints"),
        doc.get("accessPoints"),
    ];

    for group in groups.into_iter().flatten() {
        let items = match group.as_array() {
            Some(items) => items,
            None => continue,
        };

        for item in items {
            let host = item
                .get("addr")
                .or_else(|| item.get("address"))
                .or_else(|| item.get("host"))
                .and_then(Value::as_str);

            let host = match host {
                Some(host) if !host.is_empty() => host.to_string(),
                _ => continue,
            };

            let port = item
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT);

            if !out.iter().any(|(h, p)| h == &host && *p == port) {
                out.push((host, port));
            }
        }
    }

    out
}

pub fn load_topology(path: impl AsRef<Path>) -> Result<Vec<(String, u16)>, Error> {
    let contents = std::fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&contents)?;

    Ok(parse_topology(&doc))
}

/// Fetches a topology document over HTTP
pub async fn fetch_topology(url: &str) -> Result<Vec<(String, u16)>, Error> {
    let doc: Value = reqwest::get(url).await?.error_for_status()?.json().await?;

    Ok(parse_topology(&doc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_producers_and_access_points() {
        let doc: Value = serde_json::from_str(
            r#"{
                "Producers": [
                    {"addr": "relay-a.example", "port": 3001},
                    {"address": "relay-b.example", "port": 6000}
                ],
                "accessPoints": [
                    {"host": "relay-a.example", "port": 3001},
                    {"host": "relay-c.example"}
                ]
            }"#,
        )
        .unwrap();

        let endpoints = parse_topology(&doc);

        assert_eq!(
            endpoints,
            vec![
                ("relay-a.example".to_string(), 3001),
                ("relay-b.example".to_string(), 6000),
                ("relay-c.example".to_string(), 3001),
            ]
        );
    }

    #[test]
    fn tolerates_unrelated_shapes() {
        let doc: Value = serde_json::from_str(r#"{"Producers": "oops"}"#).unwrap();
        assert!(parse_topology(&doc).is_empty());

        let doc: Value = serde_json::from_str(r#"{}"#).unwrap();
        assert!(parse_topology(&doc).is_empty());
    }
}
