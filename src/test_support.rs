//! Throwaway HTTP responder for checker tests.
//!
//! `GET /status/<code>` answers with that status and an empty body. Every
//! response waits `delay` first so concurrent requests overlap.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::settings::Settings;

#[derive(Clone, Default)]
struct Counters {
    hits: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay: Duration,
}

pub struct StatusServer {
    addr: SocketAddr,
    counters: Counters,
}

impl StatusServer {
    pub async fn start(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counters = Counters {
            delay,
            ..Counters::default()
        };

        let app = Router::new()
            .route("/status/:code", get(status))
            .with_state(counters.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, counters }
    }

    pub fn url(&self, code: u16) -> String {
        format!("http://{}/status/{}", self.addr, code)
    }

    pub fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

async fn status(State(counters): State<Counters>, Path(code): Path<u16>) -> StatusCode {
    let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
    counters.peak.fetch_max(now, Ordering::SeqCst);
    counters.hits.fetch_add(1, Ordering::SeqCst);

    tokio::time::sleep(counters.delay).await;
    // Done counting before the client can see the reply and send its next request.
    counters.active.fetch_sub(1, Ordering::SeqCst);
    StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
}

/// A URL on a port nothing is listening on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/status/200", addr)
}

/// Settings rooted in a fresh temp dir, bypassing any system proxy.
pub fn temp_settings() -> (tempfile::TempDir, Settings) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::in_dir(dir.path());
    settings.no_proxy = true;
    settings.concurrency = 4;
    (dir, settings)
}
