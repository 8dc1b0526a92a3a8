use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::records::{RESULT_HEADER, URL_HEADER};
use crate::settings::Settings;

/// Recreate the intermediate, combined and failures files with fresh headers.
/// Anything left over from a previous run is discarded.
pub fn create_outputs(settings: &Settings) -> Result<()> {
    write_header(&settings.organized, &URL_HEADER)?;
    write_header(&settings.results, &RESULT_HEADER)?;
    write_header(&settings.failures, &RESULT_HEADER)?;
    info!(
        "Created {}, {}, {}",
        settings.organized.display(),
        settings.results.display(),
        settings.failures.display()
    );
    Ok(())
}

/// Create the combined and failures files only where they are missing, so a
/// standalone check keeps the parse failures an earlier organize wrote.
pub fn ensure_results_files(settings: &Settings) -> Result<()> {
    for path in [&settings.results, &settings.failures] {
        if path.exists() {
            debug!("Appending to existing {}", path.display());
        } else {
            write_header(path, &RESULT_HEADER)?;
        }
    }
    Ok(())
}

fn write_header(path: &Path, header: &[&str]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut w = csv::Writer::from_writer(file);
    w.write_record(header)?;
    w.flush()?;
    Ok(())
}

/// Open a CSV file that has a header row, for reading records by name.
pub fn open_reader(path: &Path) -> Result<csv::Reader<File>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(csv::ReaderBuilder::new().has_headers(true).from_reader(file))
}

/// Append-only CSV writer. Every row is flushed as soon as it is written.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvSink {
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for append", path.display()))?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn write<T: Serialize>(&mut self, row: &T) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        self.writer.flush()?;
        Ok(())
    }
}
