use anyhow::Result;
use std::io::Write;

use crate::track_processor::TrackResult;

/// Human-readable listing of every processed file and its matches
pub fn write_text_report<W: Write>(results: &[TrackResult], mut writer: W) -> Result<()> {
    for result in results {
        writeln!(writer)?;
        writeln!(writer, "File: {}", result.filename.display())?;
        writeln!(
            writer,
            "Travel Date: {}",
            result.travel_date.format("%B %-d, %Y")
        )?;

        if result.matches.is_empty() {
            writeln!(writer, "No matches found")?;
        } else {
            writeln!(writer, "Trail matches:")?;
            for (i, m) in result.matches.iter().enumerate() {
                writeln!(
                    writer,
                    "  {}. {} ({:.1}% match, Type: {}, Length: {:.1}, OSM ID: {})",
                    i + 1,
                    m.name,
                    m.similarity * 100.0,
                    m.trail_type,
                    m.length_miles,
                    m.way_id
                )?;
            }
        }
        writeln!(writer, "{}", "-".repeat(40))?;
    }
    writer.flush()?;
    Ok(())
}

/// One CSV row per match; files without matches produce no rows
pub fn write_csv_report<W: Write>(results: &[TrackResult], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record([
        "Filename",
        "TravelDate",
        "TrailName",
        "TrailType",
        "Length",
        "Similarity",
        "OSMID",
    ])?;

    for result in results {
        let filename = result.filename.display().to_string();
        let travel_date = result.travel_date.format("%Y-%m-%d").to_string();
        for m in &result.matches {
            writer.write_record([
                filename.clone(),
                travel_date.clone(),
                m.name.clone(),
                m.trail_type.clone(),
                format!("{:.1}", m.length_miles),
                format!("{:.2}", m.similarity * 100.0),
                m.way_id.to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}
