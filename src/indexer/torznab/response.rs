//! Torznab XML response parsing
//!
//! Parses `t=caps` documents and RSS 2.0 result feeds with Torznab extensions.

use anyhow::{Result, anyhow};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, error};
use url::Url;

use crate::indexer::{SearchingItem, TorznabCapabilities, TorznabResult};

/// Collect `(key, value)` pairs of an element's attributes
fn attributes(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
            (key, value)
        })
        .collect()
}

fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> &'a str {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

/// Extract the `<error code=".." description=".."/>` of an error document
pub fn parse_error(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.name().as_ref() == b"error" => {
                let attrs = attributes(e);
                let code = attribute(&attrs, "code");
                let description = attribute(&attrs, "description");
                return Some(format!("{} (code {})", description, code));
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Parse a `t=caps` document
pub fn parse_capabilities(xml: &str) -> Result<TorznabCapabilities> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut caps = TorznabCapabilities::default();
    let mut in_searching = false;
    let mut saw_caps = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"caps" => saw_caps = true,
                b"searching" => in_searching = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if in_searching => {
                let attrs = attributes(e);
                let item = SearchingItem::from_attrs(
                    attribute(&attrs, "available"),
                    attribute(&attrs, "supportedParams"),
                );
                match e.name().as_ref() {
                    b"search" => caps.search = item,
                    b"tv-search" => caps.tv_search = item,
                    b"movie-search" => caps.movie_search = item,
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"searching" => in_searching = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                error!(error = %e, "Error parsing Torznab caps");
                return Err(anyhow!("XML parse error: {}", e));
            }
            _ => {}
        }
    }

    if !saw_caps {
        return Err(anyhow!("Unexpected caps response format"));
    }

    Ok(caps)
}

/// Parse a result feed; `indexer_name` is used when the feed does not name
/// the indexer that produced an item
pub fn parse_results(xml: &str, indexer_name: &str) -> Result<Vec<TorznabResult>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut results = Vec::new();
    let mut current_item: Option<ResultBuilder> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag_name == "item" {
                    current_item = Some(ResultBuilder::default());
                } else if let Some(ref mut item) = current_item {
                    item.apply_element(&tag_name, &attributes(e));
                }
                current_tag = tag_name;
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(ref mut item) = current_item {
                    let tag_name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    item.apply_element(&tag_name, &attributes(e));
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(ref mut item) = current_item {
                    let text = e.unescape().unwrap_or_default().to_string();
                    if !text.is_empty() {
                        item.apply_text(&current_tag, text);
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(ref mut item) = current_item {
                    let text = String::from_utf8_lossy(e).trim().to_string();
                    if !text.is_empty() {
                        item.apply_text(&current_tag, text);
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(item) = current_item.take() {
                        if let Some(result) = item.build(indexer_name) {
                            results.push(result);
                        }
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                error!(error = %e, "Error parsing Torznab XML");
                return Err(anyhow!("XML parse error: {}", e));
            }
            _ => {}
        }
    }

    Ok(results)
}

/// Accumulates the fields of one `<item>`
#[derive(Default)]
struct ResultBuilder {
    title: Option<String>,
    indexer: Option<String>,
    link: Option<String>,
    enclosure: Option<String>,
    size: Option<i64>,
    seeders: Option<i32>,
    peers: Option<i32>,
    info_hash: Option<String>,
    magnet: Option<String>,
    private: bool,
}

impl ResultBuilder {
    fn apply_element(&mut self, tag_name: &str, attrs: &[(String, String)]) {
        match tag_name {
            "torznab:attr" | "newznab:attr" => {
                self.set_torznab_attr(attribute(attrs, "name"), attribute(attrs, "value"))
            }
            "enclosure" => {
                let url = attribute(attrs, "url");
                if !url.is_empty() {
                    self.enclosure = Some(url.to_string());
                }
                if self.size.is_none() {
                    self.size = attribute(attrs, "length").parse().ok();
                }
            }
            "jackettindexer" => {
                let id = attribute(attrs, "id");
                if !id.is_empty() {
                    self.indexer = Some(id.to_string());
                }
            }
            _ => {}
        }
    }

    fn apply_text(&mut self, tag_name: &str, text: String) {
        match tag_name {
            "title" => self.title = Some(text),
            "link" => self.link = Some(text),
            "size" => self.size = text.parse().ok(),
            "type" => {
                let kind = text.to_lowercase();
                self.private = kind == "private" || kind == "semi-private";
            }
            _ => {}
        }
    }

    fn set_torznab_attr(&mut self, name: &str, value: &str) {
        match name {
            "seeders" => self.seeders = value.parse().ok(),
            "peers" => self.peers = value.parse().ok(),
            "size" => {
                if let Ok(size) = value.parse() {
                    self.size = Some(size);
                }
            }
            "infohash" => self.info_hash = Some(value.to_lowercase()),
            "magneturl" => self.magnet = Some(value.to_string()),
            _ => {
                debug!(attr_name = name, attr_value = value, "Ignoring torznab attribute");
            }
        }
    }

    fn build(self, indexer_name: &str) -> Option<TorznabResult> {
        let title = self.title?;

        let mut magnet_link = self.magnet.unwrap_or_default();
        let mut source_link = String::new();
        for link in [self.enclosure, self.link].into_iter().flatten() {
            if link.starts_with("magnet:") {
                if magnet_link.is_empty() {
                    magnet_link = link;
                }
            } else if source_link.is_empty() && link.starts_with("http") {
                source_link = link;
            }
        }

        let hash = self
            .info_hash
            .filter(|h| !h.is_empty())
            .or_else(|| hash_from_magnet(&magnet_link))
            .unwrap_or_default();

        let seeders = self.seeders.unwrap_or(0);
        let leechers = self.peers.map(|p| (p - seeders).max(0)).unwrap_or(0);

        Some(TorznabResult {
            indexer: self.indexer.unwrap_or_else(|| indexer_name.to_string()),
            hash,
            title,
            size: self.size.unwrap_or(-1),
            seeders,
            leechers,
            private: self.private,
            files: Vec::new(),
            magnet_link,
            source_link,
        })
    }
}

/// Lowercase hex info-hash of a magnet's `xt=urn:btih:` parameter
pub fn hash_from_magnet(magnet: &str) -> Option<String> {
    let url = Url::parse(magnet).ok()?;
    if url.scheme() != "magnet" {
        return None;
    }

    url.query_pairs().find_map(|(key, value)| {
        if key != "xt" {
            return None;
        }
        let raw = value.strip_prefix("urn:btih:")?;
        match raw.len() {
            40 if raw.chars().all(|c| c.is_ascii_hexdigit()) => Some(raw.to_lowercase()),
            32 => base32_decode(raw).map(hex::encode),
            _ => None,
        }
    })
}

/// RFC 4648 base32 without padding, as used by older magnet links
fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let mut bits: u64 = 0;
    let mut bit_count = 0;
    let mut out = Vec::with_capacity(input.len() * 5 / 8);

    for c in input.chars() {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u64 - 'A' as u64,
            c @ '2'..='7' => c as u64 - '2' as u64 + 26,
            _ => return None,
        };
        bits = (bits << 5) | value;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
            bits &= (1 << bit_count) - 1;
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CAPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<caps>
  <server title="Jackett" />
  <searching>
    <search available="yes" supportedParams="q" />
    <tv-search available="yes" supportedParams="q,season,ep,imdbid" />
    <movie-search available="no" supportedParams="q" />
  </searching>
</caps>"#;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <item>
      <title>Show S01E02 1080p</title>
      <type>private</type>
      <jackettindexer id="tracker-a">Tracker A</jackettindexer>
      <size>1500</size>
      <link>https://tracker.example/dl/1.torrent</link>
      <enclosure url="https://tracker.example/dl/1.torrent" length="1500" type="application/x-bittorrent" />
      <torznab:attr name="seeders" value="10" />
      <torznab:attr name="peers" value="14" />
      <torznab:attr name="infohash" value="ABCDEF0123456789ABCDEF0123456789ABCDEF01" />
    </item>
    <item>
      <title><![CDATA[Movie 2020 720p]]></title>
      <link>magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&amp;dn=Movie</link>
      <torznab:attr name="seeders" value="3" />
    </item>
    <item>
      <link>https://tracker.example/dl/untitled.torrent</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_capabilities() {
        let caps = parse_capabilities(CAPS).unwrap();
        assert!(caps.search.available);
        assert!(caps.tv_search.available);
        assert_eq!(caps.tv_search.supported_params.len(), 4);
        assert!(!caps.movie_search.available);
    }

    #[test]
    fn test_parse_capabilities_rejects_other_documents() {
        assert!(parse_capabilities("<rss></rss>").is_err());
    }

    #[test]
    fn test_parse_results() {
        let results = parse_results(FEED, "Jackett").unwrap();
        assert_eq!(results.len(), 2);

        let first = &results[0];
        assert_eq!(first.indexer, "tracker-a");
        assert_eq!(first.title, "Show S01E02 1080p");
        assert_eq!(first.hash, "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(first.size, 1500);
        assert_eq!(first.seeders, 10);
        assert_eq!(first.leechers, 4);
        assert!(first.private);
        assert!(first.magnet_link.is_empty());
        assert_eq!(first.source_link, "https://tracker.example/dl/1.torrent");
        assert!(first.has_missing_data());

        let second = &results[1];
        assert_eq!(second.indexer, "Jackett");
        assert_eq!(second.title, "Movie 2020 720p");
        assert_eq!(second.hash, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(second.size, -1);
        assert!(!second.private);
        assert!(second.source_link.is_empty());
        assert!(!second.has_missing_data());
    }

    #[test]
    fn test_parse_error() {
        let xml = r#"<?xml version="1.0"?><error code="100" description="Invalid API Key" />"#;
        assert_eq!(parse_error(xml).unwrap(), "Invalid API Key (code 100)");
        assert!(parse_error(CAPS).is_none());
    }

    #[test]
    fn test_hash_from_magnet() {
        assert_eq!(
            hash_from_magnet("magnet:?xt=urn:btih:ABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap(),
            "abcdef0123456789abcdef0123456789abcdef01"
        );
        // base32 form of 20 zero bytes
        assert_eq!(
            hash_from_magnet("magnet:?xt=urn:btih:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap(),
            "0000000000000000000000000000000000000000"
        );
        assert!(hash_from_magnet("https://example.com").is_none());
        assert!(hash_from_magnet("magnet:?dn=nohash").is_none());
    }
}
