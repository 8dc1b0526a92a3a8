use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

const DATA_DIR: &str = "data";
const INPUT_FILE: &str = "data.csv";
const ORGANIZED_FILE: &str = "organized-request-urls.csv";
const RESULTS_FILE: &str = "all-requests.csv";
const FAILURES_FILE: &str = "failed-request.csv";
const DEFAULT_CONCURRENCY: usize = 32;
/// The result channel holds twice this many rows and must fit in one semaphore.
pub const MAX_CONCURRENCY: usize = tokio::sync::Semaphore::MAX_PERMITS / 2;

/// What to do with a response whose status falls outside 200..=599.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutOfRangePolicy {
    /// Write nothing (legacy behavior).
    #[default]
    Drop,
    /// Record as FAILED with the actual code.
    Failed,
    /// Record as UNCLASSIFIED in the combined file only.
    Report,
}

/// How transport-level errors are written out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UnreachablePolicy {
    /// FAILED with the 404 sentinel code.
    #[default]
    Legacy,
    /// UNREACHABLE with code 0.
    Distinct,
}

/// Paths and knobs for one run. Passed explicitly to every stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub input: PathBuf,
    pub organized: PathBuf,
    pub results: PathBuf,
    pub failures: PathBuf,
    pub concurrency: usize,
    pub request_timeout_secs: Option<u64>,
    pub out_of_range: OutOfRangePolicy,
    pub unreachable: UnreachablePolicy,
    /// Ignore `HTTP_PROXY` and friends.
    pub no_proxy: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::in_dir(DATA_DIR)
    }
}

impl Settings {
    /// Default settings with every file placed under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            input: dir.join(INPUT_FILE),
            organized: dir.join(ORGANIZED_FILE),
            results: dir.join(RESULTS_FILE),
            failures: dir.join(FAILURES_FILE),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout_secs: None,
            out_of_range: OutOfRangePolicy::default(),
            unreachable: UnreachablePolicy::default(),
            no_proxy: false,
        }
    }

    /// Keep everything but move the four files under `dir`.
    pub fn rebase(mut self, dir: impl AsRef<Path>) -> Self {
        let moved = Self::in_dir(dir);
        self.input = moved.input;
        self.organized = moved.organized;
        self.results = moved.results;
        self.failures = moved.failures;
        self
    }

    /// Load from `PIXEL_*` environment variables over the defaults.
    /// `PIXEL_DATA_DIR` rebases the paths before any per-file override.
    pub fn from_env() -> Result<Self> {
        let source = config::Environment::with_prefix("PIXEL").try_parsing(true);
        Self::from_source(source)
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let raw = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read PIXEL_* settings")?;

        // Only paths not named explicitly follow PIXEL_DATA_DIR.
        let unset = |key: &str| raw.get_string(key).is_err();
        let (input, organized, results, failures) = (
            unset("input"),
            unset("organized"),
            unset("results"),
            unset("failures"),
        );
        let base = raw.get_string("data_dir").ok().map(Settings::in_dir);

        let mut settings: Settings = raw
            .try_deserialize()
            .context("Invalid PIXEL_* settings")?;

        if let Some(base) = base {
            if input {
                settings.input = base.input;
            }
            if organized {
                settings.organized = base.organized;
            }
            if results {
                settings.results = base.results;
            }
            if failures {
                settings.failures = base.failures;
            }
        }
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.concurrency > MAX_CONCURRENCY {
            bail!("concurrency must be at most {}", MAX_CONCURRENCY);
        }
        Ok(())
    }
}
