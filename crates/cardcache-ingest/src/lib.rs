//! Bulk document ingestion: one-shot HTTPS fetch + shape-aware JSON parsing.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cardcache_core::{RawCardEntry, SetGroup};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "cardcache-ingest";

/// Set code used when a flat-list document is folded into the set mapping.
pub const FLAT_SET_CODE: &str = "ALL";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed bulk document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Anything that can produce the raw bulk document bytes. The production
/// implementation is [`BulkFetcher`]; the engine's tests substitute doubles.
#[async_trait]
pub trait BulkSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            // The bulk document runs to hundreds of megabytes; the timeout
            // covers the whole buffered download.
            timeout: Duration::from_secs(900),
            user_agent: None,
        }
    }
}

/// One-shot HTTPS fetcher for the bulk document. Issues exactly one GET per
/// call and buffers the whole body; retry is the caller's concern.
#[derive(Debug)]
pub struct BulkFetcher {
    client: reqwest::Client,
    url: String,
}

impl BulkFetcher {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl BulkSource for BulkFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await?.to_vec();
        let mut hasher = Sha256::new();
        hasher.update(&body);
        info!(
            url = %final_url,
            bytes = body.len(),
            sha256 = %hex::encode(hasher.finalize()),
            "bulk document downloaded"
        );
        Ok(body)
    }
}

/// Which of the two published document shapes to expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DocumentShape {
    /// Peek at the first significant byte: `[` means flat list, anything
    /// else is treated as the nested set mapping.
    #[default]
    Auto,
    /// `{ "data": { <setCode>: { "cards": [...] } } }`
    SetMap,
    /// A bare top-level array of card objects.
    FlatList,
}

impl DocumentShape {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "setmap" | "nested" => Some(Self::SetMap),
            "flatlist" | "flat" => Some(Self::FlatList),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BulkDocument {
    #[serde(rename = "data")]
    sets: BTreeMap<String, SetGroup>,
}

/// Decode the bulk document into per-set card lists. All-or-nothing: any
/// structural failure aborts the attempt. The ordered map keeps the set
/// iteration order stable across cycles, which the deduplicator relies on.
pub fn parse_document(
    bytes: &[u8],
    shape: DocumentShape,
) -> Result<BTreeMap<String, SetGroup>, ParseError> {
    let shape = match shape {
        DocumentShape::Auto => detect_shape(bytes),
        fixed => fixed,
    };

    match shape {
        DocumentShape::SetMap => {
            let doc: BulkDocument = serde_json::from_slice(bytes)?;
            Ok(doc.sets)
        }
        DocumentShape::FlatList => {
            let cards: Vec<RawCardEntry> = serde_json::from_slice(bytes)?;
            let mut sets = BTreeMap::new();
            sets.insert(FLAT_SET_CODE.to_string(), SetGroup { cards });
            Ok(sets)
        }
        DocumentShape::Auto => unreachable!("auto shape resolved above"),
    }
}

fn detect_shape(bytes: &[u8]) -> DocumentShape {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => DocumentShape::FlatList,
        _ => DocumentShape::SetMap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"{
        "meta": { "version": "5.2.2" },
        "data": {
            "LEA": { "cards": [
                { "uuid": "id-1", "name": "Black Lotus", "types": ["Artifact"], "convertedManaCost": 0.0 }
            ]},
            "ICE": { "cards": [
                { "uuid": "id-2", "name": "Lim-Dûl's Paladin", "colors": ["B", "R"], "face": "" }
            ]}
        }
    }"#;

    const FLAT: &str = r#"[
        { "uuid": "id-1", "name": "Black Lotus", "types": ["Artifact"] },
        { "uuid": "id-2", "name": "Fire // Ice", "face": "flip" }
    ]"#;

    #[test]
    fn nested_shape_decodes_into_per_set_groups() {
        let sets = parse_document(NESTED.as_bytes(), DocumentShape::SetMap).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets["LEA"].cards[0].name, "Black Lotus");
        assert_eq!(sets["ICE"].cards[0].colors, vec!["B", "R"]);
        // Unlisted card fields default rather than failing the decode.
        assert_eq!(sets["LEA"].cards[0].face, "");
        assert_eq!(sets["ICE"].cards[0].cmc, 0.0);
    }

    #[test]
    fn flat_shape_folds_into_a_single_group() {
        let sets = parse_document(FLAT.as_bytes(), DocumentShape::FlatList).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[FLAT_SET_CODE].cards.len(), 2);
        assert_eq!(sets[FLAT_SET_CODE].cards[1].face, "flip");
    }

    #[test]
    fn auto_detects_both_shapes() {
        let nested = parse_document(NESTED.as_bytes(), DocumentShape::Auto).unwrap();
        assert_eq!(nested.len(), 2);
        let flat = parse_document(format!("  \n{FLAT}").as_bytes(), DocumentShape::Auto).unwrap();
        assert_eq!(flat.len(), 1);
    }

    #[test]
    fn malformed_document_is_an_error_not_a_partial_result() {
        assert!(parse_document(b"{\"data\": 42}", DocumentShape::SetMap).is_err());
        assert!(parse_document(b"not json", DocumentShape::Auto).is_err());
        assert!(parse_document(b"", DocumentShape::Auto).is_err());
    }

    #[test]
    fn empty_document_yields_zero_sets() {
        let sets = parse_document(br#"{"data": {}}"#, DocumentShape::Auto).unwrap();
        assert!(sets.is_empty());
        let flat = parse_document(b"[]", DocumentShape::Auto).unwrap();
        assert_eq!(flat[FLAT_SET_CODE].cards.len(), 0);
    }

    #[test]
    fn shape_names_parse_case_insensitively() {
        assert_eq!(DocumentShape::parse("auto"), Some(DocumentShape::Auto));
        assert_eq!(DocumentShape::parse("SetMap"), Some(DocumentShape::SetMap));
        assert_eq!(DocumentShape::parse("flat"), Some(DocumentShape::FlatList));
        assert_eq!(DocumentShape::parse("parquet"), None);
    }
}
