//! Filling in missing info-hashes and magnet links of search results
//!
//! Some indexers only return a download link for the `.torrent`. Those links
//! are fetched once per batch, however many results share them, and the
//! resolved data is copied onto every result with that link.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, header, redirect};
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::indexer::torznab::response::hash_from_magnet;
use crate::indexer::{TorrentFile, TorznabResult};
use crate::services::cache::{SharedCache, create_cache};
use crate::services::job_queue::process_concurrent;
use crate::services::rate_limiter::{ResponseExt, RetryConfig, retry_async};

/// Resolved sources are reused for this long
const SOURCE_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const SOURCE_CACHE_CAPACITY: usize = 5120;
/// Redirects between http locations followed before giving up
const MAX_REDIRECTS: usize = 5;

/// What a source link resolved to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSource {
    pub hash: String,
    pub magnet_link: String,
    pub private: bool,
    pub files: Vec<TorrentFile>,
}

/// Turns a torrent download link into hash and magnet
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, source_link: &str) -> Result<ResolvedSource>;
}

/// Resolve every result that lacks hash or magnet but has a source link.
///
/// Each distinct link is fetched once, with at most `concurrency` fetches in
/// flight. Returns the number of results that were updated.
pub async fn enrich(
    results: &mut [TorznabResult],
    resolver: Arc<dyn SourceResolver>,
    concurrency: usize,
) -> usize {
    let mut links: Vec<String> = results
        .iter()
        .filter(|r| r.has_missing_data() && !r.source_link.is_empty())
        .map(|r| r.source_link.clone())
        .collect();
    links.sort();
    links.dedup();

    if links.is_empty() {
        return 0;
    }

    debug!(links = links.len(), "Resolving torrent source links");

    let resolved: HashMap<String, ResolvedSource> =
        process_concurrent(links, concurrency, |link: String| {
            let resolver = resolver.clone();
            async move {
                let outcome = resolver.resolve(&link).await;
                (link, outcome)
            }
        })
        .await
        .into_iter()
        .filter_map(|(link, outcome)| match outcome {
            Ok(source) => Some((link, source)),
            Err(e) => {
                warn!(source_link = %link, error = %e, "Failed to resolve torrent source");
                None
            }
        })
        .collect();

    let mut updated = 0;
    for result in results.iter_mut() {
        if !result.has_missing_data() {
            continue;
        }
        let Some(source) = resolved.get(&result.source_link) else {
            continue;
        };
        if result.hash.is_empty() {
            result.hash = source.hash.clone();
        }
        if result.magnet_link.is_empty() {
            result.magnet_link = source.magnet_link.clone();
        }
        if result.files.is_empty() {
            result.files = source.files.clone();
        }
        result.private |= source.private;
        updated += 1;
    }
    updated
}

/// Fetches source links over HTTP without following redirects to magnets
pub struct HttpSourceResolver {
    client: Client,
    cache: SharedCache<ResolvedSource>,
    retry: RetryConfig,
}

impl HttpSourceResolver {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .gzip(true)
            .timeout(Duration::from_secs(30))
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            cache: create_cache(SOURCE_CACHE_TTL, SOURCE_CACHE_CAPACITY),
            retry: RetryConfig::default(),
        })
    }

    /// GET `url`, retrying network errors and transient statuses
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        retry_async(
            || async {
                let response = self.client.get(url).send().await?;
                if response.is_transient_error() {
                    bail!("HTTP {}", response.status());
                }
                Ok::<_, anyhow::Error>(response)
            },
            &self.retry,
            "fetch_torrent_source",
        )
        .await
    }

    async fn fetch(&self, source_link: &str) -> Result<ResolvedSource> {
        let mut url = source_link.to_string();

        for _ in 0..=MAX_REDIRECTS {
            let response = self.get(&url).await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| anyhow!("Redirect without location"))?
                    .to_string();

                if location.starts_with("magnet:?") {
                    let hash = hash_from_magnet(&location)
                        .ok_or_else(|| anyhow!("Magnet without info-hash"))?;
                    return Ok(ResolvedSource {
                        hash,
                        magnet_link: location,
                        ..Default::default()
                    });
                }

                url = reqwest::Url::parse(&url)
                    .and_then(|base| base.join(&location))
                    .with_context(|| format!("Invalid redirect location: {}", location))?
                    .to_string();
                continue;
            }

            if !status.is_success() {
                bail!("HTTP {}", status);
            }

            let bytes = response.bytes().await?;
            return parse_torrent(&bytes);
        }

        bail!("Too many redirects")
    }
}

#[async_trait]
impl SourceResolver for HttpSourceResolver {
    async fn resolve(&self, source_link: &str) -> Result<ResolvedSource> {
        if let Some(cached) = self.cache.get(source_link) {
            return Ok(cached);
        }

        let source = self.fetch(source_link).await?;
        self.cache.set(source_link.to_string(), source.clone());
        Ok(source)
    }
}

fn dict_get<'a>(dict: &'a HashMap<Vec<u8>, Value>, key: &str) -> Option<&'a Value> {
    dict.get(key.as_bytes())
}

fn as_str(value: &Value) -> Option<String> {
    match value {
        Value::Bytes(b) => Some(String::from_utf8_lossy(b).to_string()),
        _ => None,
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

/// Index just past the bencoded value starting at `pos`
fn value_end(bytes: &[u8], pos: usize) -> Result<usize> {
    match bytes.get(pos) {
        Some(b'i') => bytes[pos..]
            .iter()
            .position(|b| *b == b'e')
            .map(|n| pos + n + 1)
            .ok_or_else(|| anyhow!("Unterminated integer at {}", pos)),
        Some(b'l') | Some(b'd') => {
            let mut p = pos + 1;
            loop {
                match bytes.get(p) {
                    Some(b'e') => return Ok(p + 1),
                    Some(_) => p = value_end(bytes, p)?,
                    None => bail!("Unterminated container at {}", pos),
                }
            }
        }
        Some(b'0'..=b'9') => {
            let colon = bytes[pos..]
                .iter()
                .position(|b| *b == b':')
                .map(|n| pos + n)
                .ok_or_else(|| anyhow!("Malformed string at {}", pos))?;
            let len: usize = std::str::from_utf8(&bytes[pos..colon])?.parse()?;
            let end = colon + 1 + len;
            if end > bytes.len() {
                bail!("String at {} runs past the end", pos);
            }
            Ok(end)
        }
        _ => bail!("Unexpected byte at {}", pos),
    }
}

/// Raw bytes of the top-level `info` value, exactly as they appear in the
/// file. The v1 info-hash is taken over these, not over a re-encoding.
fn info_span(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.first() != Some(&b'd') {
        bail!("Torrent is not a dictionary");
    }
    let mut p = 1;
    while let Some(&b) = bytes.get(p) {
        if b == b'e' {
            break;
        }
        let key_end = value_end(bytes, p)?;
        let colon = bytes[p..key_end]
            .iter()
            .position(|b| *b == b':')
            .ok_or_else(|| anyhow!("Dictionary key at {} is not a string", p))?;
        let end = value_end(bytes, key_end)?;
        if &bytes[p + colon + 1..key_end] == b"info" {
            return Ok(&bytes[key_end..end]);
        }
        p = end;
    }
    bail!("Torrent has no info")
}

/// Info-hash, magnet, private flag and file list of a `.torrent`
pub fn parse_torrent(bytes: &[u8]) -> Result<ResolvedSource> {
    let root: Value = serde_bencode::from_bytes(bytes).context("Not a bencoded torrent")?;
    let Value::Dict(root) = root else {
        bail!("Torrent is not a dictionary");
    };
    let info = dict_get(&root, "info").ok_or_else(|| anyhow!("Torrent has no info"))?;
    let Value::Dict(info) = info else {
        bail!("Torrent info is not a dictionary");
    };

    let hash = hex::encode(Sha1::digest(info_span(bytes)?));

    let name = dict_get(info, "name").and_then(as_str).unwrap_or_default();
    let private = dict_get(info, "private").and_then(as_int) == Some(1);

    let files = match dict_get(info, "files") {
        Some(Value::List(entries)) => entries
            .iter()
            .filter_map(|entry| {
                let Value::Dict(entry) = entry else {
                    return None;
                };
                let size = dict_get(entry, "length").and_then(as_int)?;
                let Some(Value::List(parts)) = dict_get(entry, "path") else {
                    return None;
                };
                let mut path = vec![name.clone()];
                path.extend(parts.iter().filter_map(as_str));
                Some(TorrentFile {
                    path: path.join("/"),
                    size,
                })
            })
            .collect(),
        _ => dict_get(info, "length")
            .and_then(as_int)
            .map(|size| {
                vec![TorrentFile {
                    path: name.clone(),
                    size,
                }]
            })
            .unwrap_or_default(),
    };

    let mut magnet = form_urlencoded::Serializer::new(String::new());
    if !name.is_empty() {
        magnet.append_pair("dn", &name);
    }
    if let Some(tracker) = dict_get(&root, "announce").and_then(as_str) {
        magnet.append_pair("tr", &tracker);
    }
    let params = magnet.finish();
    let magnet_link = if params.is_empty() {
        format!("magnet:?xt=urn:btih:{}", hash)
    } else {
        format!("magnet:?xt=urn:btih:{}&{}", hash, params)
    };

    Ok(ResolvedSource {
        hash,
        magnet_link,
        private,
        files,
    })
}
