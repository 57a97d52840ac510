//! Core types for talking to Torznab indexers

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

/// Type of search query (the Torznab `t` parameter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// General text search
    #[default]
    Search,
    /// TV show search (supports season/episode)
    TvSearch,
    /// Movie search
    MovieSearch,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Search => write!(f, "search"),
            QueryType::TvSearch => write!(f, "tvsearch"),
            QueryType::MovieSearch => write!(f, "movie"),
        }
    }
}

impl FromStr for QueryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" => Ok(QueryType::Search),
            "tvsearch" | "tv-search" => Ok(QueryType::TvSearch),
            "movie" | "movie-search" => Ok(QueryType::MovieSearch),
            _ => Err(anyhow!("Unsupported search function: {}", s)),
        }
    }
}

/// Search parameters an indexer may advertise in its caps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParam {
    Q,
    Season,
    Ep,
    ImdbId,
    TvdbId,
    TmdbId,
    Year,
}

impl FromStr for SearchParam {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "q" => Ok(SearchParam::Q),
            "season" => Ok(SearchParam::Season),
            "ep" => Ok(SearchParam::Ep),
            "imdbid" => Ok(SearchParam::ImdbId),
            "tvdbid" => Ok(SearchParam::TvdbId),
            "tmdbid" => Ok(SearchParam::TmdbId),
            "year" => Ok(SearchParam::Year),
            _ => Err(anyhow!("Unknown search param: {}", s)),
        }
    }
}

/// One `<searching>` entry of a caps document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchingItem {
    pub available: bool,
    pub supported_params: Vec<SearchParam>,
}

impl SearchingItem {
    /// Parse the `supportedParams` attribute, ignoring params we never send
    pub fn from_attrs(available: &str, supported_params: &str) -> Self {
        Self {
            available: available.eq_ignore_ascii_case("yes"),
            supported_params: supported_params
                .split(',')
                .filter_map(|p| p.parse().ok())
                .collect(),
        }
    }
}

/// Capabilities of a Torznab indexer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorznabCapabilities {
    pub search: SearchingItem,
    pub tv_search: SearchingItem,
    pub movie_search: SearchingItem,
}

impl TorznabCapabilities {
    fn item(&self, query_type: QueryType) -> &SearchingItem {
        match query_type {
            QueryType::Search => &self.search,
            QueryType::TvSearch => &self.tv_search,
            QueryType::MovieSearch => &self.movie_search,
        }
    }

    /// Whether the search function is available
    pub fn supports(&self, query_type: QueryType) -> bool {
        self.item(query_type).available
    }

    /// Whether the search function is available and accepts `param`
    pub fn supports_param(&self, query_type: QueryType, param: SearchParam) -> bool {
        let item = self.item(query_type);
        item.available && item.supported_params.contains(&param)
    }
}

/// A search query in Torznab format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorznabQuery {
    /// The type of search
    pub query_type: QueryType,
    /// Free-text search term
    pub search_term: Option<String>,
    /// Season number
    pub season: Option<u32>,
    /// Episode number
    pub episode: Option<u32>,
    /// IMDB ID without the `tt` prefix
    pub imdb_id: Option<String>,
    /// Release year
    pub year: Option<i32>,
}

impl TorznabQuery {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            ..Default::default()
        }
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    pub fn with_season_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    /// Add IMDB ID to the query (with or without the `tt` prefix)
    pub fn with_imdb(mut self, imdb_id: &str) -> Self {
        self.imdb_id = Some(imdb_id.trim_start_matches("tt").to_string());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Whether the query targets an item by id instead of by title
    pub fn is_id_search(&self) -> bool {
        self.imdb_id.is_some()
    }

    /// Query parameters in a stable order, `t` first
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("t", self.query_type.to_string())];
        if let Some(ref term) = self.search_term {
            params.push(("q", term.clone()));
        }
        if let Some(ref imdb_id) = self.imdb_id {
            params.push(("imdbid", imdb_id.clone()));
        }
        if let Some(season) = self.season {
            params.push(("season", season.to_string()));
        }
        if let Some(episode) = self.episode {
            params.push(("ep", episode.to_string()));
        }
        if let Some(year) = self.year {
            params.push(("year", year.to_string()));
        }
        params
    }

    /// URL-encoded form, as stored in a query plan
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params())
            .finish()
    }

    /// Parse a stored, URL-encoded query
    pub fn parse(encoded: &str) -> Result<Self> {
        let mut query_type = None;
        let mut query = TorznabQuery::default();

        for (key, value) in form_urlencoded::parse(encoded.as_bytes()) {
            match key.as_ref() {
                "t" => query_type = Some(value.parse::<QueryType>()?),
                "q" => query.search_term = Some(value.into_owned()),
                "imdbid" => query.imdb_id = Some(value.trim_start_matches("tt").to_string()),
                "season" => {
                    query.season = Some(value.parse().map_err(|_| anyhow!("Invalid season: {}", value))?)
                }
                "ep" => {
                    query.episode = Some(value.parse().map_err(|_| anyhow!("Invalid episode: {}", value))?)
                }
                "year" => {
                    query.year = Some(value.parse().map_err(|_| anyhow!("Invalid year: {}", value))?)
                }
                other => bail!("Unsupported query parameter: {}", other),
            }
        }

        query.query_type = query_type.ok_or_else(|| anyhow!("Missing search function (t)"))?;
        Ok(query)
    }
}

impl fmt::Display for TorznabQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// A file inside a torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub path: String,
    pub size: i64,
}

/// A single search result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorznabResult {
    /// Indexer that produced the result
    pub indexer: String,
    /// Lowercase hex v1 info-hash
    pub hash: String,
    pub title: String,
    /// Size in bytes, -1 if unknown
    pub size: i64,
    pub seeders: i32,
    pub leechers: i32,
    pub private: bool,
    pub files: Vec<TorrentFile>,
    pub magnet_link: String,
    /// Download link for the `.torrent`, used to fill in a missing hash or magnet
    pub source_link: String,
}

impl TorznabResult {
    /// Results without both hash and magnet cannot be stored yet
    pub fn has_missing_data(&self) -> bool {
        self.hash.is_empty() || self.magnet_link.is_empty()
    }
}
