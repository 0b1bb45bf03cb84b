use log::{debug, trace};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::geo_utils::{GeoPoint, haversine_km, path_length_miles};
use crate::map_index::{MapIndex, TrailCandidate};

/// Similarity scoring configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    /// Points kept from each sequence before comparing
    pub sample_size: usize,
    /// Candidates must score strictly above this to be reported
    pub acceptance_threshold: f64,
    /// Average offset (km) at which similarity reaches zero
    pub zero_similarity_km: f64,
    /// Maximum matches reported per track
    pub max_matches: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            sample_size: 20,
            acceptance_threshold: 0.5,
            zero_similarity_km: 1.0,
            max_matches: 5,
        }
    }
}

/// A trail a track was matched against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailMatch {
    pub name: String,
    pub trail_type: String,
    /// Real-world length of the way in miles, one decimal
    pub length_miles: f64,
    /// Score in [0, 1]
    pub similarity: f64,
    pub way_id: i64,
}

/// Scores trail candidates against a track using the nodes of a map index
pub struct TrailMatcher<'a> {
    index: &'a MapIndex,
    config: MatchConfig,
}

impl<'a> TrailMatcher<'a> {
    pub fn new(index: &'a MapIndex, config: MatchConfig) -> Self {
        Self { index, config }
    }

    /// Rank `candidates` by similarity to `track`.
    ///
    /// Only candidates scoring above the acceptance threshold are kept; the
    /// result is best-first and capped at `max_matches`.
    pub fn match_candidates(
        &self,
        track: &[GeoPoint],
        candidates: &[TrailCandidate<'_>],
    ) -> Vec<TrailMatch> {
        let track_sample = sample_points(track, self.config.sample_size);

        let mut matches: Vec<TrailMatch> = candidates
            .iter()
            .filter_map(|candidate| self.score_candidate(&track_sample, candidate))
            .collect();

        // Stable sort keeps index order between equal scores
        matches.sort_by_key(|m| Reverse(OrderedFloat(m.similarity)));
        matches.truncate(self.config.max_matches);

        debug!(
            "{} of {} candidates accepted",
            matches.len(),
            candidates.len()
        );
        matches
    }

    fn score_candidate(
        &self,
        track_sample: &[GeoPoint],
        candidate: &TrailCandidate<'_>,
    ) -> Option<TrailMatch> {
        let way_points = self.index.resolve_points(candidate.node_ids);
        if way_points.is_empty() {
            trace!("Way {} has no resolvable nodes", candidate.way_id);
            return None;
        }

        let way_sample = sample_points(&way_points, self.config.sample_size);
        let avg_km = average_min_distance_km(track_sample, &way_sample);
        let similarity = similarity_from_distance(avg_km, self.config.zero_similarity_km);
        trace!(
            "Way {} ({}): avg offset {:.3} km, similarity {:.3}",
            candidate.way_id, candidate.name, avg_km, similarity
        );

        if similarity <= self.config.acceptance_threshold {
            return None;
        }

        Some(TrailMatch {
            name: candidate.name.to_string(),
            trail_type: candidate.trail_type.to_string(),
            length_miles: path_length_miles(&way_points),
            similarity,
            way_id: candidate.way_id,
        })
    }
}

/// Evenly spaced subset of `points`; sequences no longer than `count` are
/// returned whole.
pub fn sample_points(points: &[GeoPoint], count: usize) -> Vec<GeoPoint> {
    if points.len() <= count {
        return points.to_vec();
    }
    (0..count).map(|i| points[i * points.len() / count]).collect()
}

/// Mean over `track` of the distance to the nearest point of `candidate`.
///
/// Directed: only measures how close the track stays to the candidate.
/// Returns infinity when either side is empty.
pub fn average_min_distance_km(track: &[GeoPoint], candidate: &[GeoPoint]) -> f64 {
    if track.is_empty() || candidate.is_empty() {
        return f64::INFINITY;
    }

    let total: f64 = track
        .iter()
        .map(|tp| {
            candidate
                .iter()
                .map(|cp| haversine_km(tp, cp))
                .fold(f64::INFINITY, f64::min)
        })
        .sum();
    total / track.len() as f64
}

/// Linear falloff from 1.0 at zero offset to 0.0 at `zero_at_km`
pub fn similarity_from_distance(avg_km: f64, zero_at_km: f64) -> f64 {
    (1.0 - avg_km / zero_at_km).max(0.0)
}

/// Similarity of `candidate` to `track` with the given parameters
pub fn calculate_similarity(track: &[GeoPoint], candidate: &[GeoPoint], config: &MatchConfig) -> f64 {
    let track_sample = sample_points(track, config.sample_size);
    let candidate_sample = sample_points(candidate, config.sample_size);
    similarity_from_distance(
        average_min_distance_km(&track_sample, &candidate_sample),
        config.zero_similarity_km,
    )
}
