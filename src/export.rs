use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::place::{Field, PlaceRecord};

/// Column order: name, every known field, then the scrape timestamp.
fn header() -> Vec<&'static str> {
    let mut row = vec!["name"];
    row.extend(Field::ALL.iter().map(|f| f.as_str()));
    row.push("scraped_at");
    row
}

fn record(place: &PlaceRecord) -> Vec<String> {
    let mut row = vec![place.name.clone()];
    row.extend(
        Field::ALL
            .iter()
            .map(|f| place.get(*f).unwrap_or_default().to_string()),
    );
    row.push(place.scraped_at.to_rfc3339());
    row
}

pub fn write_csv<W: Write>(w: W, places: &[PlaceRecord]) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(w);
    writer.write_record(header())?;
    for place in places {
        writer.write_record(record(place))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_file(places: &[PlaceRecord], out: &Path) -> Result<()> {
    if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file = File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
    write_csv(BufWriter::new(file), places)
        .with_context(|| format!("Failed to write {}", out.display()))
}
