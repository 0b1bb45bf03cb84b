//! Finds which named trails a set of GPS tracks followed.
//!
//! An OSM XML extract is parsed once into a [`MapIndex`] (and cached next to
//! the extract), each GPX track is matched against nearby trail ways, and the
//! resulting completed trails are merged into a trail checklist.

pub mod cache_loader;
pub mod config;
pub mod error;
pub mod geo_utils;
pub mod io;
pub mod map_index;
pub mod mapmatcher;
pub mod osm_preprocessing;
pub mod report;
pub mod track_processor;
pub mod trails;

pub use cache_loader::MapStore;
pub use config::Config;
pub use error::TrailError;
pub use map_index::MapIndex;
pub use mapmatcher::{MatchConfig, TrailMatch, TrailMatcher};
pub use track_processor::{TrackProcessor, TrackResult};
pub use trails::{Reconciliation, Trail, merge, trails_from_results};
