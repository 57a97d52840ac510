//! Turning target metadata into an indexer-specific query plan

use crate::db::{QueryPlan, QueryPlanEntry};
use crate::indexer::{QueryType, SearchParam, TargetId, TorznabCapabilities, TorznabQuery};
use crate::services::metadata::TargetMetadata;

pub trait QueryPlanBuilder: Send + Sync {
    /// Queries to run for `meta` on an indexer with `caps`, in execution order
    fn build(&self, caps: &TorznabCapabilities, meta: &TargetMetadata) -> QueryPlan;
}

/// Plans an exact id query when the indexer supports one, then one query per title
#[derive(Debug, Default, Clone, Copy)]
pub struct TorznabPlanBuilder;

impl TorznabPlanBuilder {
    fn episode_queries(
        caps: &TorznabCapabilities,
        meta: &TargetMetadata,
        season: u32,
        episode: u32,
    ) -> Vec<(TorznabQuery, bool)> {
        let query_type = if caps.supports(QueryType::TvSearch) {
            QueryType::TvSearch
        } else if caps.supports(QueryType::Search) {
            QueryType::Search
        } else {
            return Vec::new();
        };
        let numbered = query_type == QueryType::TvSearch
            && caps.supports_param(query_type, SearchParam::Season)
            && caps.supports_param(query_type, SearchParam::Ep);

        let with_episode = |query: TorznabQuery| {
            if numbered {
                query.with_season_episode(season, episode)
            } else {
                query
            }
        };

        let mut queries = Vec::new();
        if caps.supports_param(query_type, SearchParam::ImdbId) {
            let query = TorznabQuery::new(query_type).with_imdb(meta.target.imdb_id());
            queries.push((with_episode(query), true));
        }
        for title in &meta.titles {
            let query = if numbered {
                with_episode(TorznabQuery::new(query_type).with_term(title.as_str()))
            } else {
                TorznabQuery::new(query_type)
                    .with_term(format!("{} S{:02}E{:02}", title, season, episode))
            };
            queries.push((query, false));
        }
        queries
    }

    fn standalone_queries(
        caps: &TorznabCapabilities,
        meta: &TargetMetadata,
    ) -> Vec<(TorznabQuery, bool)> {
        let query_type = if caps.supports(QueryType::MovieSearch) {
            QueryType::MovieSearch
        } else if caps.supports(QueryType::Search) {
            QueryType::Search
        } else {
            return Vec::new();
        };

        let mut queries = Vec::new();
        if caps.supports_param(query_type, SearchParam::ImdbId) {
            queries.push((
                TorznabQuery::new(query_type).with_imdb(meta.target.imdb_id()),
                true,
            ));
        }
        for title in &meta.titles {
            let query = match meta.year {
                Some(year) if caps.supports_param(query_type, SearchParam::Year) => {
                    TorznabQuery::new(query_type)
                        .with_term(title.as_str())
                        .with_year(year)
                }
                Some(year) => TorznabQuery::new(query_type).with_term(format!("{} {}", title, year)),
                None => TorznabQuery::new(query_type).with_term(title.as_str()),
            };
            queries.push((query, false));
        }
        queries
    }
}

impl QueryPlanBuilder for TorznabPlanBuilder {
    fn build(&self, caps: &TorznabCapabilities, meta: &TargetMetadata) -> QueryPlan {
        let queries = match meta.target {
            TargetId::Episode {
                season, episode, ..
            } => Self::episode_queries(caps, meta, season, episode),
            TargetId::Standalone { .. } => Self::standalone_queries(caps, meta),
        };

        let mut entries: Vec<QueryPlanEntry> = Vec::with_capacity(queries.len());
        for (query, exact) in queries {
            let encoded = query.encode();
            if !entries.iter().any(|e| e.query == encoded) {
                entries.push(QueryPlanEntry::new(encoded, exact));
            }
        }
        QueryPlan::from(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::SearchingItem;
    use pretty_assertions::assert_eq;

    fn caps(tv: (&str, &str), movie: (&str, &str)) -> TorznabCapabilities {
        TorznabCapabilities {
            search: SearchingItem::from_attrs("yes", "q"),
            tv_search: SearchingItem::from_attrs(tv.0, tv.1),
            movie_search: SearchingItem::from_attrs(movie.0, movie.1),
        }
    }

    fn meta(target: &str, titles: &[&str], year: Option<i32>) -> TargetMetadata {
        TargetMetadata {
            target: target.parse().unwrap(),
            titles: titles.iter().map(|t| t.to_string()).collect(),
            year,
        }
    }

    fn queries(plan: &QueryPlan) -> Vec<(&str, bool)> {
        plan.iter().map(|e| (e.query.as_str(), e.exact)).collect()
    }

    #[test]
    fn test_episode_with_full_tv_support() {
        let plan = TorznabPlanBuilder.build(
            &caps(("yes", "q,season,ep,imdbid"), ("no", "")),
            &meta("tt0386676:2:5", &["The Office", "The Office US"], None),
        );

        assert_eq!(
            queries(&plan),
            vec![
                ("t=tvsearch&imdbid=0386676&season=2&ep=5", true),
                ("t=tvsearch&q=The+Office&season=2&ep=5", false),
                ("t=tvsearch&q=The+Office+US&season=2&ep=5", false),
            ]
        );
    }

    #[test]
    fn test_episode_falls_back_to_text_search() {
        let plan = TorznabPlanBuilder.build(
            &caps(("no", ""), ("no", "")),
            &meta("tt0386676:2:5", &["The Office"], None),
        );

        assert_eq!(queries(&plan), vec![("t=search&q=The+Office+S02E05", false)]);
    }

    #[test]
    fn test_movie_with_year() {
        let plan = TorznabPlanBuilder.build(
            &caps(("no", ""), ("yes", "q,imdbid,year")),
            &meta("tt0245429", &["Spirited Away"], Some(2001)),
        );

        assert_eq!(
            queries(&plan),
            vec![
                ("t=movie&imdbid=0245429", true),
                ("t=movie&q=Spirited+Away&year=2001", false),
            ]
        );
    }

    #[test]
    fn test_duplicate_queries_are_dropped() {
        let plan = TorznabPlanBuilder.build(
            &caps(("no", ""), ("no", "")),
            &meta("tt0245429", &["Heat", "Heat"], Some(1995)),
        );
        assert_eq!(queries(&plan), vec![("t=search&q=Heat+1995", false)]);
    }

    #[test]
    fn test_no_titles_and_no_id_search_gives_empty_plan() {
        let plan = TorznabPlanBuilder.build(
            &caps(("no", ""), ("no", "")),
            &TargetMetadata::bare("tt0245429".parse().unwrap()),
        );
        assert!(plan.is_empty());
    }
}
