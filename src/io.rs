use anyhow::{Context, Result};
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::trails::{Trail, normalize_completion_date};

/// Trail master list as copied from the park website.
///
/// Every trail is three non-empty lines:
///
/// ```text
/// Wildwood Trail
/// Trail 30.2 miles
/// Home > Parks > Forest Park
/// ```
///
/// The last `>` part of the breadcrumb is the park. Repeated (name, park)
/// pairs are dropped, and an incomplete trailing block is ignored.
pub fn parse_raw_input<R: BufRead>(reader: R) -> Result<Vec<Trail>> {
    let mut trails: Vec<Trail> = Vec::new();
    let mut block: Vec<String> = Vec::with_capacity(3);

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        block.push(line.to_string());
        if block.len() < 3 {
            continue;
        }

        let (trail_type, length) = match parse_type_and_length(&block[1]) {
            Some((trail_type, length)) => (trail_type.to_string(), length.to_string()),
            None => (String::new(), "0.0 miles".to_string()),
        };
        let trail = Trail {
            name: block[0].clone(),
            park: breadcrumb_park(&block[2]).to_string(),
            trail_type,
            length,
            ..Default::default()
        };

        if trails
            .iter()
            .any(|t| t.name == trail.name && t.park == trail.park)
        {
            debug!("Skipping duplicate {} in {}", trail.name, trail.park);
        } else {
            trails.push(trail);
        }
        block.clear();
    }

    Ok(trails)
}

/// `"<Type> <number> miles"` split into type and number
fn parse_type_and_length(line: &str) -> Option<(&str, &str)> {
    let mut tokens = line.split_whitespace();
    let (trail_type, length, unit) = (tokens.next()?, tokens.next()?, tokens.next()?);
    if tokens.next().is_some() || unit != "miles" || !is_decimal(length) {
        return None;
    }
    Some((trail_type, length))
}

/// Digits with an optional fractional part, e.g. `7` or `7.35`
fn is_decimal(s: &str) -> bool {
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    match s.split_once('.') {
        Some((whole, frac)) => all_digits(whole) && all_digits(frac),
        None => all_digits(s),
    }
}

fn breadcrumb_park(line: &str) -> &str {
    line.rfind('>')
        .map(|i| line[i + 1..].trim_start())
        .unwrap_or("")
}

/// Markdown checklist in the layout the templating side writes:
///
/// ```text
/// ## Forest Park
/// - Wildwood Trail
///     - Trail
///     - 30.2 miles
///     - Completed 10/10/2023
///     - https://example.org/wildwood
/// ```
pub fn parse_checklist<R: BufRead>(reader: R) -> Result<Vec<Trail>> {
    let mut trails = Vec::new();
    let mut park = String::new();
    let mut current: Option<Trail> = None;

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        if let Some(heading) = line.strip_prefix("## ") {
            park = heading.trim_start().to_string();
        } else if let Some(name) = line.strip_prefix("- ") {
            if let Some(done) = current.take().filter(|t| !t.name.is_empty()) {
                trails.push(done);
            }
            current = Some(Trail {
                name: name.trim_start().to_string(),
                park: park.clone(),
                ..Default::default()
            });
        } else if let Some(detail) = line.strip_prefix("    - ") {
            if let Some(trail) = current.as_mut() {
                apply_detail(trail, detail);
            }
        }
    }

    if let Some(done) = current.filter(|t| !t.name.is_empty()) {
        trails.push(done);
    }
    Ok(trails)
}

fn apply_detail(trail: &mut Trail, detail: &str) {
    let lowered = detail.to_ascii_lowercase();
    if detail == "Trail" || detail == "Connector" {
        trail.trail_type = detail.to_string();
    } else if detail.ends_with("miles") {
        trail.length = detail
            .strip_suffix("miles")
            .map(str::trim_end)
            .filter(|n| is_decimal(n))
            .unwrap_or("NaN")
            .to_string();
    } else if lowered.starts_with("completed") {
        trail.completed = true;
        trail.completion_date = normalize_completion_date(&detail["completed".len()..]);
    } else if detail.starts_with("http") {
        trail.url = detail.to_string();
    }
}

pub fn read_raw_input_file(path: &Path) -> Result<Vec<Trail>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open trail list {}", path.display()))?;
    parse_raw_input(BufReader::new(file))
        .with_context(|| format!("Failed to read trail list {}", path.display()))
}

pub fn read_checklist_file(path: &Path) -> Result<Vec<Trail>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open checklist {}", path.display()))?;
    parse_checklist(BufReader::new(file))
        .with_context(|| format!("Failed to read checklist {}", path.display()))
}

/// Pretty JSON array of trails for the rendering side
pub fn write_trails_json<W: Write>(trails: &[Trail], mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, trails)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_INPUT: &str = "
Wildwood Trail
Trail 30.2 miles
Home > Parks & Nature > Forest Park

Maple Trail
Trail 7 miles
Home > Parks & Nature > Forest Park
Wildwood Trail
Trail 30.2 miles
Home > Parks & Nature > Forest Park

Holman Lane
a short connector
Home > Parks & Nature >  Macleay Park
Dangling
Trail 1.0 miles
";

    const CHECKLIST: &str = "# PDX Trails Completionist
## Forest Park
- Wildwood Trail
    - Trail
    - 30.2 miles
    - Completed 6/1/23
    - https://example.org/trails/wildwood-trail
- Firelane 1
    - Connector
    - about a mile
## Macleay Park
- Lower Macleay Trail
    - Trail
    - 0.9 miles
    - completed sometime
";

    #[test]
    fn test_parse_raw_input() {
        let trails = parse_raw_input(RAW_INPUT.as_bytes()).unwrap();
        assert_eq!(trails.len(), 3);

        assert_eq!(trails[0].name, "Wildwood Trail");
        assert_eq!(trails[0].park, "Forest Park");
        assert_eq!(trails[0].trail_type, "Trail");
        assert_eq!(trails[0].length, "30.2");
        assert!(!trails[0].completed);

        assert_eq!(trails[1].name, "Maple Trail");
        assert_eq!(trails[1].length, "7");

        assert_eq!(trails[2].name, "Holman Lane");
        assert_eq!(trails[2].park, "Macleay Park");
        assert_eq!(trails[2].trail_type, "");
        assert_eq!(trails[2].length, "0.0 miles");
    }

    #[test]
    fn test_breadcrumb_without_separator() {
        assert_eq!(breadcrumb_park("Forest Park"), "");
        assert_eq!(breadcrumb_park("Home >Forest Park"), "Forest Park");
    }

    #[test]
    fn test_parse_checklist() {
        let trails = parse_checklist(CHECKLIST.as_bytes()).unwrap();
        assert_eq!(trails.len(), 3, "last trail must not be dropped");

        let wildwood = &trails[0];
        assert_eq!(wildwood.park, "Forest Park");
        assert_eq!(wildwood.trail_type, "Trail");
        assert_eq!(wildwood.length, "30.2");
        assert!(wildwood.completed);
        assert_eq!(wildwood.completion_date, "06/01/2023");
        assert_eq!(wildwood.url, "https://example.org/trails/wildwood-trail");

        let firelane = &trails[1];
        assert_eq!(firelane.trail_type, "Connector");
        assert_eq!(firelane.length, "");
        assert!(!firelane.completed);

        let macleay = &trails[2];
        assert_eq!(macleay.park, "Macleay Park");
        assert!(macleay.completed);
        assert_eq!(macleay.completion_date, "01/01/1970");
    }

    #[test]
    fn test_only_level_two_headings_and_list_items_count() {
        let checklist = "## Forest Park\n- Wildwood Trail\n### Notes\n---\n-no space\n";
        let trails = parse_checklist(checklist.as_bytes()).unwrap();
        assert_eq!(trails.len(), 1);
        assert_eq!(trails[0].name, "Wildwood Trail");
        assert_eq!(trails[0].park, "Forest Park");
    }

    #[test]
    fn test_length_without_number_is_nan() {
        let trails = parse_checklist("- Spur\n    - a few miles\n".as_bytes()).unwrap();
        assert_eq!(trails[0].length, "NaN");
    }

    #[test]
    fn test_write_trails_json() {
        let trails = parse_checklist(CHECKLIST.as_bytes()).unwrap();
        let mut out = Vec::new();
        write_trails_json(&trails, &mut out).unwrap();

        let parsed: Vec<Trail> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, trails);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = read_checklist_file(Path::new("/nonexistent/checklist.md")).unwrap_err();
        assert!(err.to_string().contains("checklist.md"));
    }
}
