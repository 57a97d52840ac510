//! Sync target identifiers
//!
//! A target is either a standalone title (`tt1234567`) or a single episode of
//! a series (`tt1234567:1:2` for season 1, episode 2).

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};

/// Storage category of results found for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentCategory {
    Movie,
    Series,
}

impl TorrentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentCategory::Movie => "movie",
            TorrentCategory::Series => "series",
        }
    }
}

/// Parsed target id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetId {
    Standalone { imdb_id: String },
    Episode { imdb_id: String, season: u32, episode: u32 },
}

impl TargetId {
    pub fn imdb_id(&self) -> &str {
        match self {
            TargetId::Standalone { imdb_id } | TargetId::Episode { imdb_id, .. } => imdb_id,
        }
    }

    pub fn is_episodic(&self) -> bool {
        matches!(self, TargetId::Episode { .. })
    }

    pub fn category(&self) -> TorrentCategory {
        if self.is_episodic() {
            TorrentCategory::Series
        } else {
            TorrentCategory::Movie
        }
    }
}

fn parse_imdb_id(s: &str) -> Result<String> {
    let digits = s
        .strip_prefix("tt")
        .ok_or_else(|| anyhow!("Target id must start with 'tt': {}", s))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        bail!("Invalid IMDb id: {}", s);
    }
    Ok(s.to_string())
}

impl FromStr for TargetId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [imdb_id] => Ok(TargetId::Standalone {
                imdb_id: parse_imdb_id(imdb_id)?,
            }),
            [imdb_id, season, episode] => Ok(TargetId::Episode {
                imdb_id: parse_imdb_id(imdb_id)?,
                season: season
                    .parse()
                    .map_err(|_| anyhow!("Invalid season in target id: {}", s))?,
                episode: episode
                    .parse()
                    .map_err(|_| anyhow!("Invalid episode in target id: {}", s))?,
            }),
            _ => Err(anyhow!("Unrecognized target id: {}", s)),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetId::Standalone { imdb_id } => write!(f, "{}", imdb_id),
            TargetId::Episode {
                imdb_id,
                season,
                episode,
            } => write!(f, "{}:{}:{}", imdb_id, season, episode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_standalone() {
        let target: TargetId = "tt0111161".parse().unwrap();
        assert_eq!(target.imdb_id(), "tt0111161");
        assert_eq!(target.category(), TorrentCategory::Movie);
        assert_eq!(target.to_string(), "tt0111161");
    }

    #[test]
    fn test_parse_episode() {
        let target: TargetId = "tt0903747:5:14".parse().unwrap();
        assert_eq!(
            target,
            TargetId::Episode {
                imdb_id: "tt0903747".to_string(),
                season: 5,
                episode: 14
            }
        );
        assert_eq!(target.category(), TorrentCategory::Series);
        assert_eq!(target.to_string(), "tt0903747:5:14");
    }

    #[test]
    fn test_parse_invalid() {
        for s in ["", "0111161", "tt", "ttabc", "tt1:1", "tt1:a:2", "tt1:1:2:3"] {
            assert!(s.parse::<TargetId>().is_err(), "{} should not parse", s);
        }
    }
}
