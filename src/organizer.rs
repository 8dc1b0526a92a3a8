use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::files::{self, CsvSink};
use crate::records::{FailureRecord, FlattenedUrlRecord, InputRecord};
use crate::settings::Settings;

/// The pixel field did not decode to a JSON array of strings.
#[derive(Debug, Error)]
#[error("cannot parse pixel list: {source}")]
pub struct PixelJsonError {
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

/// Decode a pixel field into its URL groups. No partial recovery.
pub fn parse_pixel_json(raw: &str) -> Result<Vec<String>, PixelJsonError> {
    serde_json::from_str::<Vec<String>>(raw).map_err(|source| PixelJsonError {
        raw: raw.to_string(),
        source,
    })
}

/// Each group is a comma-joined list of URLs.
pub fn split_urls(groups: &[String]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|g| g.split(','))
        .map(str::to_string)
        .collect()
}

pub enum RowOutcome {
    Flattened(usize),
    Invalid,
}

/// Where the organizer appends its output.
pub struct OrganizeSinks {
    pub organized: CsvSink,
    pub failures: CsvSink,
}

impl OrganizeSinks {
    pub fn open(settings: &Settings) -> Result<Self> {
        Ok(Self {
            organized: CsvSink::append(&settings.organized)?,
            failures: CsvSink::append(&settings.failures)?,
        })
    }
}

pub fn organize_record(record: &InputRecord, sinks: &mut OrganizeSinks) -> Result<RowOutcome> {
    let groups = match parse_pixel_json(&record.impression_pixel_json) {
        Ok(groups) => groups,
        Err(e) => {
            warn!(tactic_id = %record.tactic_id, "{}", e);
            sinks
                .failures
                .write(&FailureRecord::invalid_json(&record.tactic_id, &e.raw))?;
            return Ok(RowOutcome::Invalid);
        }
    };

    let urls = split_urls(&groups);
    for url in &urls {
        sinks.organized.write(&FlattenedUrlRecord {
            tactic_id: record.tactic_id.clone(),
            url: url.clone(),
        })?;
    }
    debug!(tactic_id = %record.tactic_id, urls = urls.len(), "Organized row");
    Ok(RowOutcome::Flattened(urls.len()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OrganizeStats {
    pub rows: usize,
    pub urls: usize,
    pub invalid: usize,
}

/// Stream the input file through `organize_record`, one row at a time.
/// The output files must already exist (see `files::create_outputs`).
pub fn organize_file(settings: &Settings) -> Result<OrganizeStats> {
    let mut reader = files::open_reader(&settings.input)?;
    let mut sinks = OrganizeSinks::open(settings)?;
    let mut stats = OrganizeStats::default();

    for (i, row) in reader.deserialize::<InputRecord>().enumerate() {
        let record = row.with_context(|| {
            format!("Failed to read row {} of {}", i + 1, settings.input.display())
        })?;
        stats.rows += 1;
        match organize_record(&record, &mut sinks)? {
            RowOutcome::Flattened(n) => stats.urls += n,
            RowOutcome::Invalid => stats.invalid += 1,
        }
    }

    info!(
        "Organized {} rows into {} URLs ({} invalid)",
        stats.rows, stats.urls, stats.invalid
    );
    Ok(stats)
}
