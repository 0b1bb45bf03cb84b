use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::mapmatcher::TrailMatch;
use crate::track_processor::TrackResult;

/// Completion date used when a checklist date can't be read
pub const DEFAULT_COMPLETION_DATE: &str = "01/01/1970";

const COMPLETION_DATE_FORMAT: &str = "%m/%d/%Y";

/// Canonical trail record exchanged with the checklist and templating side
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trail {
    pub name: String,
    pub park: String,
    #[serde(rename = "type")]
    pub trail_type: String,
    /// Miles, as text
    pub length: String,
    pub url: String,
    pub completed: bool,
    /// `MM/DD/YYYY`, empty when not completed
    pub completion_date: String,
}

/// User-facing trail classification derived from an OSM `highway` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailKind {
    Trail,
    Unknown,
}

impl TrailKind {
    pub fn from_osm_highway(highway: &str) -> Self {
        match highway {
            "path" | "footway" | "track" | "trail" => TrailKind::Trail,
            _ => TrailKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrailKind::Trail => "Trail",
            TrailKind::Unknown => "Unknown",
        }
    }
}

/// Outcome of merging completed trails into the checklist
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// At least one completed trail was available to merge
    Merged(Vec<Trail>),
    /// Nothing to merge; the raw trails are returned untouched
    NoCompletedTrails(Vec<Trail>),
}

impl Reconciliation {
    pub fn trails(&self) -> &[Trail] {
        match self {
            Reconciliation::Merged(trails) | Reconciliation::NoCompletedTrails(trails) => trails,
        }
    }

    pub fn into_trails(self) -> Vec<Trail> {
        match self {
            Reconciliation::Merged(trails) | Reconciliation::NoCompletedTrails(trails) => trails,
        }
    }

    pub fn is_reconciled(&self) -> bool {
        matches!(self, Reconciliation::Merged(_))
    }
}

/// Merge completed trails into the raw checklist.
///
/// Raw trails drive the output: each one is matched by exact name against
/// `completed` (first hit wins) and on a hit takes the completed type, length
/// and completion state while keeping its own name, park and URL. Completed
/// trails that aren't on the checklist are dropped.
pub fn merge(completed: &[Trail], raw: Vec<Trail>) -> Reconciliation {
    if completed.is_empty() {
        return Reconciliation::NoCompletedTrails(raw);
    }

    let mut matched = 0;
    let merged = raw
        .into_iter()
        .map(|raw_trail| match completed.iter().find(|c| c.name == raw_trail.name) {
            Some(done) => {
                matched += 1;
                Trail {
                    trail_type: done.trail_type.clone(),
                    length: done.length.clone(),
                    completed: done.completed,
                    completion_date: done.completion_date.clone(),
                    ..raw_trail
                }
            }
            None => raw_trail,
        })
        .collect::<Vec<_>>();

    info!(
        "Reconciled {} of {} checklist trails with {} completed trails",
        matched,
        merged.len(),
        completed.len()
    );
    Reconciliation::Merged(merged)
}

/// Turn track results into completed trail records.
///
/// A result with a single match contributes it unconditionally; with several
/// matches each one is added unless a trail of the same name (ignoring case)
/// is already in the list.
pub fn trails_from_results(results: &[TrackResult]) -> Vec<Trail> {
    let mut trails: Vec<Trail> = Vec::new();

    for result in results {
        let completion_date = result.travel_date.format(COMPLETION_DATE_FORMAT).to_string();
        match result.matches.as_slice() {
            [] => info!("No matches found for {}", result.filename.display()),
            [only] => {
                debug!("Added {} from {}", only.name, result.filename.display());
                trails.push(completed_trail(only, &completion_date));
            }
            matches => {
                for m in matches {
                    let folded = m.name.to_lowercase();
                    if trails.iter().any(|t| t.name.to_lowercase() == folded) {
                        continue;
                    }
                    debug!("Added {} from {}", m.name, result.filename.display());
                    trails.push(completed_trail(m, &completion_date));
                }
            }
        }
    }

    trails
}

fn completed_trail(m: &TrailMatch, completion_date: &str) -> Trail {
    Trail {
        name: m.name.clone(),
        park: String::new(),
        trail_type: TrailKind::from_osm_highway(&m.trail_type).as_str().to_string(),
        length: format!("{:.1}", m.length_miles),
        url: String::new(),
        completed: true,
        completion_date: completion_date.to_string(),
    }
}

/// Read `MM/DD/YYYY`, `MM/DD/YY`, `M/D/YYYY` or `M/D/YY`.
///
/// Two-digit years 69..=99 land in the 1900s, the rest in the 2000s.
pub fn parse_completion_date(input: &str) -> Option<NaiveDate> {
    let mut parts = input.split('/');
    let (month, day, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let digits = |s: &str, lens: &[usize]| {
        lens.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(month, &[1, 2]) || !digits(day, &[1, 2]) || !digits(year, &[2, 4]) {
        return None;
    }

    let mut year: i32 = year.parse().ok()?;
    if year < 100 {
        year += if year >= 69 { 1900 } else { 2000 };
    }
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

/// Completion date as `MM/DD/YYYY`, or the epoch default when unreadable
pub fn normalize_completion_date(input: &str) -> String {
    parse_completion_date(input.trim())
        .map(|date| date.format(COMPLETION_DATE_FORMAT).to_string())
        .unwrap_or_else(|| DEFAULT_COMPLETION_DATE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn raw(name: &str, park: &str) -> Trail {
        Trail {
            name: name.to_string(),
            park: park.to_string(),
            trail_type: "Trail".to_string(),
            length: "1.0".to_string(),
            ..Default::default()
        }
    }

    fn trail_match(name: &str, highway: &str, length: f64) -> TrailMatch {
        TrailMatch {
            name: name.to_string(),
            trail_type: highway.to_string(),
            length_miles: length,
            similarity: 0.9,
            way_id: 1,
        }
    }

    fn result(file: &str, day: u32, matches: Vec<TrailMatch>) -> TrackResult {
        TrackResult {
            filename: PathBuf::from(file),
            travel_date: Utc.with_ymd_and_hms(2023, 6, day, 12, 0, 0).unwrap(),
            matches,
        }
    }

    #[test]
    fn test_merge_single_pair() {
        let raw_trails = vec![Trail {
            name: "Wildwood".to_string(),
            park: "Forest Park".to_string(),
            url: "http://x".to_string(),
            ..Default::default()
        }];
        let completed = vec![Trail {
            name: "Wildwood".to_string(),
            trail_type: "Trail".to_string(),
            length: "5.2".to_string(),
            completed: true,
            completion_date: "06/01/2023".to_string(),
            ..Default::default()
        }];

        let merged = merge(&completed, raw_trails);
        assert!(merged.is_reconciled());
        assert_eq!(
            merged.into_trails(),
            vec![Trail {
                name: "Wildwood".to_string(),
                park: "Forest Park".to_string(),
                trail_type: "Trail".to_string(),
                length: "5.2".to_string(),
                url: "http://x".to_string(),
                completed: true,
                completion_date: "06/01/2023".to_string(),
            }]
        );
    }

    #[test]
    fn test_merge_preserves_cardinality_without_overlap() {
        let raw_trails = vec![raw("Wildwood", "Forest Park"), raw("Maple", "Forest Park")];
        let completed = vec![raw("Leif Erikson", ""), raw("Firelane 1", "")];

        let merged = merge(&completed, raw_trails.clone());
        assert_eq!(merged.trails().len(), raw_trails.len());
        assert_eq!(merged.trails(), raw_trails.as_slice());
    }

    #[test]
    fn test_merge_without_completed_trails() {
        let raw_trails = vec![raw("Wildwood", "Forest Park")];
        let outcome = merge(&[], raw_trails.clone());
        assert!(!outcome.is_reconciled());
        assert_eq!(outcome, Reconciliation::NoCompletedTrails(raw_trails));
    }

    #[test]
    fn test_merge_is_case_sensitive_and_first_match_wins() {
        let raw_trails = vec![raw("Wildwood", "Forest Park")];
        let mut first = raw("Wildwood", "");
        first.length = "5.2".to_string();
        let mut second = raw("Wildwood", "");
        second.length = "9.9".to_string();
        let mut lower = raw("wildwood", "");
        lower.length = "1.1".to_string();

        let merged = merge(&[lower.clone(), first, second], raw_trails.clone());
        assert_eq!(merged.trails()[0].length, "5.2");

        let unmatched = merge(&[lower], raw_trails);
        assert_eq!(unmatched.trails()[0].length, "1.0");
    }

    #[test]
    fn test_trail_kind_mapping() {
        for highway in ["path", "footway", "track", "trail"] {
            assert_eq!(TrailKind::from_osm_highway(highway), TrailKind::Trail);
        }
        assert_eq!(TrailKind::from_osm_highway("residential").as_str(), "Unknown");
    }

    #[test]
    fn test_trails_from_results() {
        let results = vec![
            result("a.gpx", 1, vec![trail_match("Wildwood", "path", 5.24)]),
            result("b.gpx", 2, vec![]),
            result(
                "c.gpx",
                3,
                vec![
                    trail_match("WILDWOOD", "path", 5.2),
                    trail_match("Maple", "footway", 1.04),
                    trail_match("Old Road", "residential", 0.3),
                ],
            ),
            result("d.gpx", 4, vec![trail_match("Maple", "path", 1.0)]),
        ];

        let trails = trails_from_results(&results);
        let names: Vec<&str> = trails.iter().map(|t| t.name.as_str()).collect();
        // Single-match results are added even when the name repeats
        assert_eq!(names, vec!["Wildwood", "Maple", "Old Road", "Maple"]);

        assert_eq!(trails[0].length, "5.2");
        assert_eq!(trails[0].completion_date, "06/01/2023");
        assert!(trails[0].completed);
        assert!(trails[0].park.is_empty());
        assert_eq!(trails[1].length, "1.0");
        assert_eq!(trails[2].trail_type, "Unknown");
    }

    #[test]
    fn test_normalize_completion_date() {
        assert_eq!(normalize_completion_date("10/10/2023"), "10/10/2023");
        assert_eq!(normalize_completion_date("5/1/22"), "05/01/2022");
        assert_eq!(normalize_completion_date("05/01/99"), "05/01/1999");
        assert_eq!(normalize_completion_date("1/2/2006"), "01/02/2006");
        assert_eq!(normalize_completion_date("13/01/2023"), DEFAULT_COMPLETION_DATE);
        assert_eq!(normalize_completion_date("2023-06-01"), DEFAULT_COMPLETION_DATE);
        assert_eq!(normalize_completion_date("06/01/023"), DEFAULT_COMPLETION_DATE);
        assert_eq!(normalize_completion_date(""), DEFAULT_COMPLETION_DATE);
    }

    #[test]
    fn test_trail_json_field_names() {
        let json = serde_json::to_value(raw("Wildwood", "Forest Park")).unwrap();
        assert_eq!(json["type"], "Trail");
        assert_eq!(json["completion_date"], "");
    }
}
