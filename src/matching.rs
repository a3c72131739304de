//! Ride matching over the record store.
//!
//! Exact search is a plain equality match on `(from, to, date)`. Relevance
//! re-applies exact search across a passenger's recent distinct searches;
//! no fuzzy matching, so a passenger is only ever shown rides on a route
//! and day they actually asked for.

use std::collections::HashSet;
use std::sync::Arc;

use crate::store::{RecordStore, Ride, SearchTriple};

/// How many distinct past searches feed relevance retrieval by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// A ride surfaced by relevance retrieval, tagged with the search that
/// found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevantRide {
    pub search: SearchTriple,
    pub ride: Ride,
}

pub struct MatchEngine {
    store: Arc<dyn RecordStore>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Active rides with free seats on exactly this route and date, by time.
    pub async fn search_exact(&self, from: &str, to: &str, date: &str) -> Vec<Ride> {
        if from.trim().is_empty() || to.trim().is_empty() || date.trim().is_empty() {
            return Vec::new();
        }
        self.store.find_open_rides(from, to, date).await
    }

    /// Rides matching any of the passenger's `history_limit` most recent
    /// distinct searches, deduplicated by ride id and sorted by date then
    /// time. On a duplicate, the most recent search wins.
    pub async fn relevant_for_passenger(
        &self,
        passenger_id: i64,
        history_limit: usize,
    ) -> Vec<RelevantRide> {
        let triples = self
            .store
            .list_recent_search_triples(passenger_id, history_limit)
            .await;

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for triple in triples {
            let rides = self
                .search_exact(&triple.from_location, &triple.to_location, &triple.date)
                .await;
            for ride in rides {
                if seen.insert(ride.id) {
                    found.push(RelevantRide {
                        search: triple.clone(),
                        ride,
                    });
                }
            }
        }

        // Stable sort keeps first-found order among equal (date, time).
        found.sort_by(|a, b| {
            (a.ride.date.as_str(), a.ride.time.as_str())
                .cmp(&(b.ride.date.as_str(), b.ride.time.as_str()))
        });
        tracing::debug!(passenger_id, count = found.len(), "Relevant rides resolved");
        found
    }
}
