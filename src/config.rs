use std::path::PathBuf;

use crate::mapmatcher::MatchConfig;

/// Run configuration handed to each component at construction
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the OSM XML extract for the region
    pub extract_path: PathBuf,
    /// Appended to the extract path to locate the binary cache
    pub cache_suffix: String,
    /// Ignore an existing cache and re-parse the extract
    pub force_reload: bool,
    /// Padding (degrees) added around a track before the spatial query
    pub bbox_buffer: f64,
    /// Similarity scoring parameters
    pub matching: MatchConfig,
    /// Walk track directories recursively
    pub recursive: bool,
    /// Worker threads for batch processing, 0 for the rayon default
    pub workers: usize,
    /// Draw progress bars on stderr
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extract_path: PathBuf::from("region.osm"),
            cache_suffix: ".bin".to_string(),
            force_reload: false,
            bbox_buffer: 0.005, // ~500 m
            matching: MatchConfig::default(),
            recursive: false,
            workers: 0,
            show_progress: true,
        }
    }
}

impl Config {
    pub fn with_extract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.extract_path = path.into();
        self
    }

    pub fn with_force_reload(mut self, force_reload: bool) -> Self {
        self.force_reload = force_reload;
        self
    }

    pub fn with_bbox_buffer(mut self, buffer: f64) -> Self {
        self.bbox_buffer = buffer;
        self
    }

    pub fn with_matching(mut self, matching: MatchConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}
