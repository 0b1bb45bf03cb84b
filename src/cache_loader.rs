use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::Config;
use crate::map_index::{MapIndex, OsmNode, OsmWay};
use crate::osm_preprocessing::OsmXmlParser;

/// Leading bytes of every cache artifact
const CACHE_MAGIC: [u8; 8] = *b"TRLMIDX\0";
/// Bumped whenever the serialized node/way layout changes
const CACHE_FORMAT_VERSION: u32 = 1;

/// Loads the map index for a region, going through a binary snapshot next to
/// the extract whenever that snapshot is at least as new as the extract.
///
/// The snapshot is only a performance cache: any problem reading it falls
/// back to a fresh parse, and failing to write it is logged and ignored.
pub struct MapStore {
    cache_suffix: String,
    show_progress: bool,
}

impl MapStore {
    pub fn new(config: &Config) -> Self {
        Self {
            cache_suffix: config.cache_suffix.clone(),
            show_progress: config.show_progress,
        }
    }

    /// Path of the cache artifact for `source`: the source path plus the suffix
    pub fn cache_path(&self, source: &Path) -> PathBuf {
        let mut path = source.as_os_str().to_owned();
        path.push(&self.cache_suffix);
        PathBuf::from(path)
    }

    /// Load the index for `source`, using the cache unless `force_reload`
    pub fn load(&self, source: &Path, force_reload: bool) -> Result<MapIndex> {
        let (index, saved) = self.load_with_status(source, force_reload)?;
        if let Err(e) = saved {
            warn!(
                "Failed to write map cache {}: {:#}",
                self.cache_path(source).display(),
                e
            );
        }
        Ok(index)
    }

    /// Re-parse `source` unconditionally and refresh its cache; unlike
    /// [`MapStore::load`], a failed cache write is an error here
    pub fn export(&self, source: &Path) -> Result<MapIndex> {
        let (index, saved) = self.load_with_status(source, true)?;
        saved.with_context(|| {
            format!(
                "Failed to write map cache {}",
                self.cache_path(source).display()
            )
        })?;
        Ok(index)
    }

    /// Index plus the outcome of the cache write (`Ok` when the cache was used)
    fn load_with_status(
        &self,
        source: &Path,
        force_reload: bool,
    ) -> Result<(MapIndex, Result<()>)> {
        let cache_path = self.cache_path(source);

        if !force_reload {
            match self.try_load_cache(source, &cache_path) {
                Ok(index) => {
                    info!(
                        "Loaded {} nodes and {} ways from cache {}",
                        index.node_count(),
                        index.way_count(),
                        cache_path.display()
                    );
                    return Ok((index, Ok(())));
                }
                Err(e) => info!("Could not use map cache: {:#}", e),
            }
        }

        info!("Parsing map extract {}", source.display());
        let index = OsmXmlParser::new()
            .with_progress(self.show_progress)
            .parse_file(source)?;

        let saved = self.save_cache(&index, &cache_path);
        Ok((index, saved))
    }

    fn try_load_cache(&self, source: &Path, cache_path: &Path) -> Result<MapIndex> {
        let cache_meta = std::fs::metadata(cache_path)
            .map_err(|_| anyhow!("cache {} doesn't exist", cache_path.display()))?;
        let source_meta = std::fs::metadata(source)
            .with_context(|| format!("can't access map extract {}", source.display()))?;

        if source_meta.modified()? > cache_meta.modified()? {
            bail!("cache {} is older than the extract", cache_path.display());
        }

        let load_start = Instant::now();
        let file = File::open(cache_path)?;
        let mut reader = BufReader::new(file);
        let config = bincode::config::standard();

        let (magic, version): ([u8; 8], u32) =
            bincode::serde::decode_from_std_read(&mut reader, config)
                .map_err(|e| anyhow!("invalid cache header: {}", e))?;
        if magic != CACHE_MAGIC || version != CACHE_FORMAT_VERSION {
            bail!("cache format {} is not supported", version);
        }

        let nodes: HashMap<i64, OsmNode> =
            bincode::serde::decode_from_std_read(&mut reader, config)
                .map_err(|e| anyhow!("invalid cached nodes: {}", e))?;
        let ways: HashMap<i64, OsmWay> = bincode::serde::decode_from_std_read(&mut reader, config)
            .map_err(|e| anyhow!("invalid cached ways: {}", e))?;

        debug!("Decoded map cache in {:?}", load_start.elapsed());
        Ok(MapIndex::from_parts(nodes, ways))
    }

    fn save_cache(&self, index: &MapIndex, cache_path: &Path) -> Result<()> {
        let save_start = Instant::now();
        let file = File::create(cache_path)?;
        let mut writer = BufWriter::new(file);
        let config = bincode::config::standard();

        bincode::serde::encode_into_std_write(
            (CACHE_MAGIC, CACHE_FORMAT_VERSION),
            &mut writer,
            config,
        )?;
        bincode::serde::encode_into_std_write(index.nodes(), &mut writer, config)?;
        bincode::serde::encode_into_std_write(index.ways(), &mut writer, config)?;
        writer.flush()?;

        debug!(
            "Wrote map cache {} in {:?}",
            cache_path.display(),
            save_start.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    const EXTRACT_V1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="45.5000" lon="-122.7000"/>
  <node id="2" lat="45.5010" lon="-122.7010"/>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="path"/>
    <tag k="name" v="Wildwood"/>
  </way>
</osm>
"#;

    const EXTRACT_V2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" lat="45.5000" lon="-122.7000"/>
  <node id="2" lat="45.5010" lon="-122.7010"/>
  <node id="3" lat="45.5020" lon="-122.7020"/>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="path"/>
    <tag k="name" v="Wildwood"/>
  </way>
  <way id="11">
    <nd ref="2"/>
    <nd ref="3"/>
    <tag k="highway" v="footway"/>
    <tag k="name" v="Leif Erikson"/>
  </way>
</osm>
"#;

    fn quiet_store() -> MapStore {
        MapStore::new(&Config::default().with_progress(false))
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_cache_path_appends_suffix() {
        let store = quiet_store();
        assert_eq!(
            store.cache_path(Path::new("/data/oregon.osm")),
            PathBuf::from("/data/oregon.osm.bin")
        );
    }

    #[test]
    fn test_round_trip_matches_fresh_parse() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("region.osm");
        std::fs::write(&source, EXTRACT_V2).unwrap();
        let store = quiet_store();

        let fresh = store.load(&source, true).unwrap();
        assert!(store.cache_path(&source).is_file());

        let cached = store.load(&source, false).unwrap();
        assert_eq!(fresh, cached);
        assert_eq!(cached.way_count(), 2);
    }

    #[test]
    fn test_fresh_cache_is_preferred_over_extract() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("region.osm");
        std::fs::write(&source, EXTRACT_V1).unwrap();
        let store = quiet_store();
        store.load(&source, false).unwrap();

        // Rewrite the extract but keep it older than the cache
        std::fs::write(&source, EXTRACT_V2).unwrap();
        set_mtime(&source, SystemTime::now() - Duration::from_secs(3600));

        let index = store.load(&source, false).unwrap();
        assert_eq!(index.way_count(), 1, "cache should have been used");
    }

    #[test]
    fn test_stale_cache_is_reparsed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("region.osm");
        std::fs::write(&source, EXTRACT_V1).unwrap();
        let store = quiet_store();
        store.load(&source, false).unwrap();

        std::fs::write(&source, EXTRACT_V2).unwrap();
        set_mtime(&source, SystemTime::now() + Duration::from_secs(3600));

        let index = store.load(&source, false).unwrap();
        assert_eq!(index.way_count(), 2);
    }

    #[test]
    fn test_corrupt_cache_falls_back_to_parse() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("region.osm");
        std::fs::write(&source, EXTRACT_V2).unwrap();
        let store = quiet_store();

        let cache = store.cache_path(&source);
        std::fs::write(&cache, b"definitely not bincode").unwrap();
        set_mtime(&cache, SystemTime::now() + Duration::from_secs(3600));

        let index = store.load(&source, false).unwrap();
        assert_eq!(index.way_count(), 2);
    }

    #[test]
    fn test_cache_write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("region.osm");
        std::fs::write(&source, EXTRACT_V1).unwrap();
        let store = quiet_store();

        // A directory where the cache file should go makes File::create fail
        std::fs::create_dir(store.cache_path(&source)).unwrap();

        let index = store.load(&source, false).unwrap();
        assert_eq!(index.way_count(), 1);
        assert!(store.export(&source).is_err());
    }

    #[test]
    fn test_export_reports_write_failure_over_old_cache() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("region.osm");
        std::fs::write(&source, EXTRACT_V1).unwrap();
        let store = quiet_store();
        store.export(&source).unwrap();

        let cache = store.cache_path(&source);
        let mut permissions = std::fs::metadata(&cache).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&cache, permissions).unwrap();
        if File::options().write(true).open(&cache).is_ok() {
            // Running as a user that ignores file permissions
            return;
        }

        std::fs::write(&source, EXTRACT_V2).unwrap();
        let err = store.export(&source).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to write map cache"));
        assert!(cache.is_file(), "the old cache is still there");
    }

    #[test]
    fn test_missing_extract_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = quiet_store()
            .load(&dir.path().join("missing.osm"), false)
            .unwrap_err();
        assert!(err.to_string().contains("missing.osm"));
    }
}
