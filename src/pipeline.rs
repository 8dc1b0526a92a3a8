use anyhow::Result;
use tracing::info;

use crate::checker::{self, CheckStats};
use crate::files;
use crate::organizer::{self, OrganizeStats};
use crate::settings::Settings;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub organize: Option<OrganizeStats>,
    pub check: Option<CheckStats>,
}

impl RunSummary {
    pub fn print(&self) {
        if let Some(o) = &self.organize {
            println!(
                "Organized {} rows into {} URLs ({} invalid pixel lists).",
                o.rows, o.urls, o.invalid
            );
        }
        if let Some(c) = &self.check {
            println!(
                "Checked {} URLs: {} pass, {} failed, {} unreachable.",
                c.total, c.passed, c.failed, c.unreachable
            );
            if c.unclassified + c.dropped > 0 {
                println!(
                    "Outside 200-599: {} reported, {} dropped.",
                    c.unclassified, c.dropped
                );
            }
        }
    }
}

/// Recreate the output files, organize the input, then check every URL.
pub async fn run(settings: &Settings) -> Result<RunSummary> {
    settings.validate()?;
    let mut summary = organize_only(settings)?;
    summary.check = Some(checker::check_file(settings).await?);
    Ok(summary)
}

pub fn organize_only(settings: &Settings) -> Result<RunSummary> {
    files::create_outputs(settings)?;
    let stats = organizer::organize_file(settings)?;
    Ok(RunSummary {
        organize: Some(stats),
        check: None,
    })
}

/// Check an existing intermediate file without touching earlier results.
pub async fn check_only(settings: &Settings) -> Result<RunSummary> {
    files::ensure_results_files(settings)?;
    info!("Checking URLs from {}", settings.organized.display());
    let stats = checker::check_file(settings).await?;
    Ok(RunSummary {
        organize: None,
        check: Some(stats),
    })
}
