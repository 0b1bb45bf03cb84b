use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Config;
use crate::error::TrailError;
use crate::geo_utils::{BoundingBox, GeoPoint};
use crate::map_index::MapIndex;
use crate::mapmatcher::{TrailMatch, TrailMatcher};

/// Matches found for one track file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackResult {
    pub filename: PathBuf,
    pub travel_date: DateTime<Utc>,
    /// Best first
    pub matches: Vec<TrailMatch>,
}

/// Runs track files through spatial query and similarity matching.
///
/// Holds the index by shared reference, so one processor can serve any
/// number of rayon workers.
pub struct TrackProcessor<'a> {
    index: &'a MapIndex,
    config: &'a Config,
}

impl<'a> TrackProcessor<'a> {
    pub fn new(index: &'a MapIndex, config: &'a Config) -> Self {
        Self { index, config }
    }

    /// Match a single GPX file
    pub fn process_file(&self, path: &Path) -> Result<TrackResult> {
        if !is_track_file(path) {
            return Err(TrailError::UnsupportedTrackFormat {
                path: path.to_path_buf(),
            }
            .into());
        }

        let gpx = read_gpx(path)?;
        let points = extract_points(&gpx);
        if points.is_empty() {
            return Err(TrailError::NoTrackPoints {
                path: path.to_path_buf(),
            }
            .into());
        }

        let travel_date = travel_date(&gpx, path);
        Ok(self.process_points(path, &points, travel_date))
    }

    /// Match an already extracted point sequence; `points` must be non-empty
    /// for any match to be found.
    pub fn process_points(
        &self,
        filename: &Path,
        points: &[GeoPoint],
        travel_date: DateTime<Utc>,
    ) -> TrackResult {
        let matches = match query_bbox(points, self.config.bbox_buffer) {
            Some(bbox) => {
                let candidates = self.index.query_trails(&bbox);
                debug!(
                    "{}: {} points, {} candidate trails",
                    filename.display(),
                    points.len(),
                    candidates.len()
                );
                TrailMatcher::new(self.index, self.config.matching.clone())
                    .match_candidates(points, &candidates)
            }
            None => Vec::new(),
        };

        TrackResult {
            filename: filename.to_path_buf(),
            travel_date,
            matches,
        }
    }

    /// Process every track file under `dir`.
    ///
    /// Files that fail are logged and skipped. `cancel` is checked before each
    /// file; a cancelled batch returns what finished so far.
    pub fn process_directory(&self, dir: &Path, cancel: &AtomicBool) -> Result<Vec<TrackResult>> {
        let files = collect_track_files(dir, self.config.recursive)?;
        if files.is_empty() {
            return Err(TrailError::NoTrackFiles {
                path: dir.to_path_buf(),
            }
            .into());
        }
        info!("Found {} GPX files in {}", files.len(), dir.display());
        self.process_paths(&files, cancel)
    }

    /// Process a single track file or a directory of them.
    ///
    /// A lone file is not a batch: its failure, including a track with no
    /// points, is returned to the caller instead of being skipped.
    pub fn process_target(&self, target: &Path, cancel: &AtomicBool) -> Result<Vec<TrackResult>> {
        if target.is_file() {
            return self.process_file(target).map(|result| vec![result]);
        }
        self.process_directory(target, cancel)
    }

    /// Process an explicit list of track files in parallel, sorted by filename
    pub fn process_paths(&self, paths: &[PathBuf], cancel: &AtomicBool) -> Result<Vec<TrackResult>> {
        let results = Arc::new(Mutex::new(Vec::with_capacity(paths.len())));

        let pb = if self.config.show_progress {
            let pb = ProgressBar::new(paths.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")?
                    .progress_chars("##-"),
            );
            pb.set_message("Matching tracks");
            pb
        } else {
            ProgressBar::hidden()
        };

        let run = || {
            paths.par_iter().for_each(|path| {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                match self.process_file(path) {
                    Ok(result) => {
                        debug!(
                            "{}: {} matches",
                            path.display(),
                            result.matches.len()
                        );
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(result);
                    }
                    Err(e) => warn!("Could not process {}: {:#}", path.display(), e),
                }
                pb.inc(1);
            })
        };

        if self.config.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
                .context("Failed to build worker pool")?;
            pool.install(run);
        } else {
            run();
        }
        pb.finish_and_clear();

        let mut results =
            std::mem::take(&mut *results.lock().unwrap_or_else(PoisonError::into_inner));
        results.sort_by(|a, b| a.filename.cmp(&b.filename));

        if cancel.load(Ordering::Relaxed) {
            info!(
                "Batch cancelled after {} of {} files",
                results.len(),
                paths.len()
            );
        } else {
            info!("Processed {} of {} files", results.len(), paths.len());
        }
        Ok(results)
    }
}

/// True for paths with a `.gpx` extension, any case
pub fn is_track_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gpx"))
}

/// Track files in `dir`, optionally descending into subdirectories
pub fn collect_track_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read track directory {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                files.extend(collect_track_files(&path, true)?);
            }
        } else if is_track_file(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

pub fn read_gpx(path: &Path) -> Result<gpx::Gpx> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open track file {}", path.display()))?;
    gpx::read(BufReader::new(file))
        .with_context(|| format!("Failed to parse GPX file {}", path.display()))
}

/// Points from track segments, else waypoints, else routes
pub fn extract_points(gpx: &gpx::Gpx) -> Vec<GeoPoint> {
    let track_points: Vec<GeoPoint> = gpx
        .tracks
        .iter()
        .flat_map(|track| &track.segments)
        .flat_map(|segment| &segment.points)
        .map(|wpt| GeoPoint::from(wpt.point()))
        .collect();
    if !track_points.is_empty() {
        return track_points;
    }

    let waypoints: Vec<GeoPoint> = gpx
        .waypoints
        .iter()
        .map(|wpt| GeoPoint::from(wpt.point()))
        .collect();
    if !waypoints.is_empty() {
        return waypoints;
    }

    gpx.routes
        .iter()
        .flat_map(|route| &route.points)
        .map(|wpt| GeoPoint::from(wpt.point()))
        .collect()
}

/// Timestamp of the first point of the first track segment
fn first_point_time(gpx: &gpx::Gpx) -> Option<DateTime<Utc>> {
    let time = gpx
        .tracks
        .first()?
        .segments
        .first()?
        .points
        .first()?
        .time
        .as_ref()?;
    let formatted = time.format().ok()?;
    DateTime::parse_from_rfc3339(&formatted)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// First point timestamp, else file modification time, else now
fn travel_date(gpx: &gpx::Gpx, path: &Path) -> DateTime<Utc> {
    first_point_time(gpx)
        .or_else(|| {
            std::fs::metadata(path)
                .and_then(|meta| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        })
        .unwrap_or_else(Utc::now)
}

/// Box around `points` padded by `buffer` degrees
pub fn query_bbox(points: &[GeoPoint], buffer: f64) -> Option<BoundingBox> {
    BoundingBox::from_points(points).map(|bbox| bbox.expand(buffer))
}
