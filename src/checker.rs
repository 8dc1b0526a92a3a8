use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::files::{self, CsvSink};
use crate::records::{FlattenedUrlRecord, ResultRecord, Status, SENTINEL_CODE};
use crate::settings::{OutOfRangePolicy, Settings, UnreachablePolicy};

/// What came back from a single GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(u16),
    /// The request never produced a response (bad URL, refused, timed out).
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass(u16),
    Failed(u16),
    Unreachable(String),
    Unclassified(u16),
}

/// 200..=399 passes, 400..=599 fails. Anything else goes to `policy`.
pub fn classify(code: u16, policy: OutOfRangePolicy) -> Option<Outcome> {
    match code {
        200..=399 => Some(Outcome::Pass(code)),
        400..=599 => Some(Outcome::Failed(code)),
        _ => match policy {
            OutOfRangePolicy::Drop => None,
            OutOfRangePolicy::Failed => Some(Outcome::Failed(code)),
            OutOfRangePolicy::Report => Some(Outcome::Unclassified(code)),
        },
    }
}

pub fn outcome(reply: Reply, policy: OutOfRangePolicy) -> Option<Outcome> {
    match reply {
        Reply::Status(code) => classify(code, policy),
        Reply::Error(reason) => Some(Outcome::Unreachable(reason)),
    }
}

pub fn to_result(
    record: FlattenedUrlRecord,
    outcome: &Outcome,
    unreachable: UnreachablePolicy,
) -> ResultRecord {
    let (status, code) = match outcome {
        Outcome::Pass(code) => (Status::Pass, *code),
        Outcome::Failed(code) => (Status::Failed, *code),
        Outcome::Unclassified(code) => (Status::Unclassified, *code),
        Outcome::Unreachable(_) => match unreachable {
            UnreachablePolicy::Legacy => (Status::Failed, SENTINEL_CODE),
            UnreachablePolicy::Distinct => (Status::Unreachable, 0),
        },
    };
    ResultRecord {
        tactic_id: record.tactic_id,
        status,
        code,
        url: record.url,
    }
}

pub fn build_client(settings: &Settings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = settings.request_timeout() {
        builder = builder.timeout(timeout);
    }
    if settings.no_proxy {
        builder = builder.no_proxy();
    }
    builder.build().context("Failed to build HTTP client")
}

/// One unconditional GET. The body is never read.
pub async fn check_url(client: &reqwest::Client, url: &str) -> Reply {
    match client.get(url).send().await {
        Ok(response) => Reply::Status(response.status().as_u16()),
        Err(e) => Reply::Error(e.to_string()),
    }
}

/// Check stats returned after completion.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub unreachable: usize,
    pub unclassified: usize,
    pub dropped: usize,
}

struct ResultSinks {
    results: CsvSink,
    failures: CsvSink,
}

pub fn read_organized(path: &Path) -> Result<Vec<FlattenedUrlRecord>> {
    let mut reader = files::open_reader(path)?;
    reader
        .deserialize()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Check every row of the intermediate file, appending outcomes as they arrive.
pub async fn check_file(settings: &Settings) -> Result<CheckStats> {
    settings.validate()?;
    let rows = read_organized(&settings.organized)?;
    let client = build_client(settings)?;
    let mut sinks = ResultSinks {
        results: CsvSink::append(&settings.results)?,
        failures: CsvSink::append(&settings.failures)?,
    };
    check_rows(client, rows, settings, &mut sinks).await
}

async fn check_rows(
    client: reqwest::Client,
    rows: Vec<FlattenedUrlRecord>,
    settings: &Settings,
    sinks: &mut ResultSinks,
) -> Result<CheckStats> {
    let total = rows.len();
    let concurrency = settings.concurrency;
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Workers send replies, this task is the only writer
    let (tx, mut rx) = mpsc::channel::<(FlattenedUrlRecord, Reply)>(concurrency * 2);

    // A permit is taken before each spawn and held until the reply is queued,
    // so at most `concurrency` requests exist at a time.
    let dispatcher = tokio::spawn(async move {
        for record in rows {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let client = client.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let reply = check_url(&client, &record.url).await;
                let _ = tx.send((record, reply)).await;
                drop(permit);
            });
        }
    });

    let mut stats = CheckStats {
        total,
        ..CheckStats::default()
    };

    while let Some((record, reply)) = rx.recv().await {
        write_outcome(record, reply, settings, sinks, &mut stats)?;
        pb.inc(1);
    }

    dispatcher.await.context("Dispatcher task failed")?;
    pb.finish_and_clear();

    info!(
        "Checked {} URLs ({} pass, {} failed, {} unreachable, {} unclassified, {} dropped)",
        stats.total,
        stats.passed,
        stats.failed,
        stats.unreachable,
        stats.unclassified,
        stats.dropped
    );
    Ok(stats)
}

fn write_outcome(
    record: FlattenedUrlRecord,
    reply: Reply,
    settings: &Settings,
    sinks: &mut ResultSinks,
    stats: &mut CheckStats,
) -> Result<()> {
    if let Reply::Error(reason) = &reply {
        warn!(tactic_id = %record.tactic_id, url = %record.url, "Request failed: {}", reason);
    }

    let Some(outcome) = outcome(reply, settings.out_of_range) else {
        warn!(
            tactic_id = %record.tactic_id,
            url = %record.url,
            "Status outside 200-599, no record written"
        );
        stats.dropped += 1;
        return Ok(());
    };

    match outcome {
        Outcome::Pass(_) => stats.passed += 1,
        Outcome::Failed(_) => stats.failed += 1,
        Outcome::Unreachable(_) => stats.unreachable += 1,
        Outcome::Unclassified(_) => stats.unclassified += 1,
    }

    let row = to_result(record, &outcome, settings.unreachable);
    info!(
        "{},{},{},{}",
        row.tactic_id,
        row.status.as_str(),
        row.code,
        row.url
    );
    sinks.results.write(&row)?;
    if row.is_failure() {
        sinks.failures.write(&row)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{refused_url, temp_settings, StatusServer};
    use std::fs;
    use std::time::Duration;

    fn write_organized(settings: &Settings, rows: &[(&str, String)]) {
        files::create_outputs(settings).unwrap();
        let mut sink = CsvSink::append(&settings.organized).unwrap();
        for (tactic_id, url) in rows {
            sink.write(&FlattenedUrlRecord {
                tactic_id: tactic_id.to_string(),
                url: url.clone(),
            })
            .unwrap();
        }
    }

    fn data_lines(path: &Path) -> Vec<String> {
        let mut lines: Vec<String> = fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect();
        lines.sort();
        lines
    }

    #[test]
    fn classification_ranges() {
        for code in [100u16, 199, 600, 999] {
            assert_eq!(classify(code, OutOfRangePolicy::Drop), None, "{}", code);
        }
        for code in 200u16..=399 {
            assert_eq!(classify(code, OutOfRangePolicy::Drop), Some(Outcome::Pass(code)));
        }
        for code in 400u16..=599 {
            assert_eq!(classify(code, OutOfRangePolicy::Drop), Some(Outcome::Failed(code)));
        }
    }

    #[test]
    fn out_of_range_policies() {
        assert_eq!(
            classify(600, OutOfRangePolicy::Failed),
            Some(Outcome::Failed(600))
        );
        assert_eq!(
            classify(150, OutOfRangePolicy::Report),
            Some(Outcome::Unclassified(150))
        );
        // in-range codes ignore the policy
        assert_eq!(classify(404, OutOfRangePolicy::Report), Some(Outcome::Failed(404)));
    }

    #[test]
    fn unreachable_rendering() {
        let record = FlattenedUrlRecord {
            tactic_id: "3".into(),
            url: "nope".into(),
        };
        let out = Outcome::Unreachable("builder error".into());

        let legacy = to_result(record.clone(), &out, UnreachablePolicy::Legacy);
        assert_eq!((legacy.status, legacy.code), (Status::Failed, 404));
        assert!(legacy.is_failure());

        let distinct = to_result(record, &out, UnreachablePolicy::Distinct);
        assert_eq!((distinct.status, distinct.code), (Status::Unreachable, 0));
        assert!(distinct.is_failure());
    }

    #[tokio::test]
    async fn pass_and_fail_rows() {
        let server = StatusServer::start(Duration::ZERO).await;
        let (_dir, settings) = temp_settings();
        write_organized(
            &settings,
            &[
                ("1", server.url(200)),
                ("1", server.url(500)),
                ("2", server.url(302)),
                ("2", server.url(404)),
            ],
        );

        let stats = check_file(&settings).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.failed, 2);

        assert_eq!(
            data_lines(&settings.results),
            vec![
                format!("1,FAILED,500,{}", server.url(500)),
                format!("1,PASS,200,{}", server.url(200)),
                format!("2,FAILED,404,{}", server.url(404)),
                format!("2,PASS,302,{}", server.url(302)),
            ]
        );
        assert_eq!(
            data_lines(&settings.failures),
            vec![
                format!("1,FAILED,500,{}", server.url(500)),
                format!("2,FAILED,404,{}", server.url(404)),
            ]
        );
    }

    #[tokio::test]
    async fn transport_errors_use_sentinel() {
        let refused = refused_url().await;
        let (_dir, settings) = temp_settings();
        write_organized(
            &settings,
            &[("7", "not a url".to_string()), ("8", refused.clone())],
        );

        let stats = check_file(&settings).await.unwrap();
        assert_eq!(stats.unreachable, 2);

        let expected = vec![
            "7,FAILED,404,not a url".to_string(),
            format!("8,FAILED,404,{}", refused),
        ];
        assert_eq!(data_lines(&settings.results), expected);
        assert_eq!(data_lines(&settings.failures), expected);
    }

    #[tokio::test]
    async fn out_of_range_dropped_by_default() {
        let server = StatusServer::start(Duration::ZERO).await;
        let (_dir, mut settings) = temp_settings();
        write_organized(&settings, &[("1", server.url(600))]);

        let stats = check_file(&settings).await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert!(data_lines(&settings.results).is_empty());
        assert!(data_lines(&settings.failures).is_empty());

        settings.out_of_range = OutOfRangePolicy::Report;
        write_organized(&settings, &[("1", server.url(600))]);
        let stats = check_file(&settings).await.unwrap();
        assert_eq!(stats.unclassified, 1);
        assert_eq!(
            data_lines(&settings.results),
            vec![format!("1,UNCLASSIFIED,600,{}", server.url(600))]
        );
        assert!(data_lines(&settings.failures).is_empty());
    }

    #[tokio::test]
    async fn out_of_range_recorded_as_failed() {
        let server = StatusServer::start(Duration::ZERO).await;
        let (_dir, mut settings) = temp_settings();
        settings.out_of_range = OutOfRangePolicy::Failed;
        write_organized(&settings, &[("4", server.url(600)), ("4", server.url(200))]);

        let stats = check_file(&settings).await.unwrap();
        assert_eq!((stats.passed, stats.failed, stats.dropped), (1, 1, 0));

        let failed = format!("4,FAILED,600,{}", server.url(600));
        assert_eq!(
            data_lines(&settings.results),
            vec![failed.clone(), format!("4,PASS,200,{}", server.url(200))]
        );
        assert_eq!(data_lines(&settings.failures), vec![failed]);
    }

    #[tokio::test]
    async fn oversized_concurrency_is_an_error() {
        let (_dir, mut settings) = temp_settings();
        write_organized(&settings, &[("1", "http://127.0.0.1:9/".to_string())]);
        settings.concurrency = usize::MAX / 2;
        assert!(check_file(&settings).await.is_err());
        assert!(data_lines(&settings.results).is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let server = StatusServer::start(Duration::from_millis(50)).await;
        let (_dir, mut settings) = temp_settings();
        settings.concurrency = 2;
        let rows: Vec<(&str, String)> = (0..8).map(|_| ("1", server.url(204))).collect();
        write_organized(&settings, &rows);

        let stats = check_file(&settings).await.unwrap();
        assert_eq!(stats.passed, 8);
        assert_eq!(server.hits(), 8);
        assert!(server.peak() <= 2, "peak was {}", server.peak());
    }

    #[tokio::test]
    async fn empty_work_list() {
        let (_dir, settings) = temp_settings();
        write_organized(&settings, &[]);
        let stats = check_file(&settings).await.unwrap();
        assert_eq!(stats, CheckStats::default());
    }
}
