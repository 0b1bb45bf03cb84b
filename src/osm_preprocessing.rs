use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use crate::error::TrailError;
use crate::map_index::{MapIndex, MapIndexBuilder, OsmNode};

/// Number of XML events between progress bar refreshes
const PROGRESS_EVENT_INTERVAL: usize = 50_000;

/// Element currently being accumulated
enum OpenElement {
    None,
    Node(OsmNode),
    Way {
        id: i64,
        nodes: Vec<i64>,
        tags: BTreeMap<String, String>,
    },
}

/// Streaming parser for OSM XML extracts.
///
/// Only `node`, `way`, `nd` and `tag` elements are interpreted; relations and
/// anything else are skipped.
pub struct OsmXmlParser {
    show_progress: bool,
}

impl OsmXmlParser {
    pub fn new() -> Self {
        Self {
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Parse an extract from disk
    pub fn parse_file(&self, path: &Path) -> Result<MapIndex> {
        let start_time = Instant::now();
        let file = File::open(path)
            .with_context(|| format!("Failed to open map extract {}", path.display()))?;
        let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        let pb = if self.show_progress {
            let pb = ProgressBar::new(file_size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta}) - Parsing map extract")?
                    .progress_chars("##-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let index = self.parse_reader(BufReader::new(file), path, &pb)?;
        pb.finish_and_clear();

        info!(
            "Parsed {} nodes and {} ways from {} in {:?}",
            index.node_count(),
            index.way_count(),
            path.display(),
            start_time.elapsed()
        );
        Ok(index)
    }

    /// Parse an extract from any buffered reader; `source` is only used for
    /// error messages.
    pub fn parse_reader<R: BufRead>(
        &self,
        reader: R,
        source: &Path,
        pb: &ProgressBar,
    ) -> Result<MapIndex> {
        let mut reader = Reader::from_reader(reader);
        reader.trim_text(true);

        let mut builder = MapIndexBuilder::new();
        let mut open = OpenElement::None;
        let mut buf = Vec::new();
        let mut events = 0usize;
        let mut depth = 0usize;

        loop {
            let next = reader.read_event_into(&mut buf);
            match next.map_err(|e| TrailError::MalformedExtract {
                path: source.to_path_buf(),
                position: reader.buffer_position() as u64,
                message: e.to_string(),
            })? {
                Event::Eof if depth > 0 => {
                    return Err(TrailError::MalformedExtract {
                        path: source.to_path_buf(),
                        position: reader.buffer_position() as u64,
                        message: format!("unexpected end of file with {} unclosed elements", depth),
                    }
                    .into());
                }
                Event::Eof => break,
                Event::Start(e) => {
                    depth += 1;
                    match e.name().as_ref() {
                        b"node" => open = OpenElement::Node(parse_node(&e)?),
                        b"way" => {
                            open = OpenElement::Way {
                                id: parse_attr(&e, b"id")?.unwrap_or(0),
                                nodes: Vec::new(),
                                tags: BTreeMap::new(),
                            }
                        }
                        _ => handle_child(&e, &mut open)?,
                    }
                }
                Event::Empty(e) => match e.name().as_ref() {
                    b"node" => builder.add_node(parse_node(&e)?),
                    b"way" => builder.add_way(
                        parse_attr(&e, b"id")?.unwrap_or(0),
                        Vec::new(),
                        BTreeMap::new(),
                    ),
                    _ => handle_child(&e, &mut open)?,
                },
                Event::End(e) => {
                    depth = depth.saturating_sub(1);
                    if matches!(e.name().as_ref(), b"node" | b"way") {
                        match std::mem::replace(&mut open, OpenElement::None) {
                            OpenElement::Node(node) => builder.add_node(node),
                            OpenElement::Way { id, nodes, tags } => {
                                builder.add_way(id, nodes, tags)
                            }
                            OpenElement::None => {}
                        }
                    }
                }
                _ => {}
            }

            events += 1;
            if events % PROGRESS_EVENT_INTERVAL == 0 {
                pb.set_position(reader.buffer_position() as u64);
            }
            buf.clear();
        }

        debug!(
            "Finished XML stream: {} events, {} nodes, {} ways",
            events,
            builder.node_count(),
            builder.way_count()
        );

        Ok(builder.build())
    }
}

impl Default for OsmXmlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `nd` and `tag` elements attach to whichever node/way is open
fn handle_child(e: &BytesStart<'_>, open: &mut OpenElement) -> Result<()> {
    match e.name().as_ref() {
        b"nd" => {
            if let OpenElement::Way { nodes, .. } = open {
                if let Some(reference) = parse_attr(e, b"ref")? {
                    nodes.push(reference);
                }
            }
        }
        b"tag" => {
            let key = attr_value(e, b"k")?.unwrap_or_default();
            if key.is_empty() {
                return Ok(());
            }
            let value = attr_value(e, b"v")?.unwrap_or_default();
            match open {
                OpenElement::Node(node) => {
                    node.tags.insert(key, value);
                }
                OpenElement::Way { tags, .. } => {
                    tags.insert(key, value);
                }
                OpenElement::None => {}
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_node(e: &BytesStart<'_>) -> Result<OsmNode> {
    Ok(OsmNode {
        id: parse_attr(e, b"id")?.unwrap_or(0),
        lat: parse_attr(e, b"lat")?.unwrap_or(0.0),
        lon: parse_attr(e, b"lon")?.unwrap_or(0.0),
        tags: BTreeMap::new(),
    })
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

/// Attribute parsed as a number; unparsable values read as absent
fn parse_attr<T: std::str::FromStr>(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<T>> {
    Ok(attr_value(e, key)?.and_then(|value| value.trim().parse::<T>().ok()))
}
