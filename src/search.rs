//! Debounced search: turns a stream of keystroke-level query updates into at
//! most one catalog fetch per pause in typing.
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::Movie;
use crate::telemetry::SearchTelemetry;
use crate::tmdb::CatalogApi;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchPhase {
    /// No timer armed and no fetch in flight.
    #[default]
    Idle,
    /// Timer armed for the latest query.
    Pending,
    Fetching,
}

/// What a search screen renders. `movies` keeps the previous results while a
/// new query is pending so the list does not flicker between keystrokes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchState {
    pub query: String,
    pub phase: SearchPhase,
    pub movies: Vec<Movie>,
    /// Query that produced `movies` or `error`.
    pub results_for: Option<String>,
    pub error: Option<String>,
}

pub struct SearchController {
    catalog: Arc<dyn CatalogApi>,
    telemetry: Arc<dyn SearchTelemetry>,
    debounce: Duration,
    state: Arc<watch::Sender<SearchState>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SearchController {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        telemetry: Arc<dyn SearchTelemetry>,
        debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            catalog,
            telemetry,
            debounce,
            state: Arc::new(state),
            pending: Mutex::new(None),
        }
    }

    /// Records the latest input and re-arms the debounce timer. Any earlier
    /// timer, and any fetch it already started, is abandoned.
    pub fn set_query(&self, text: impl Into<String>) {
        let query = text.into();
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        self.state.send_modify(|s| {
            s.query = query.clone();
            s.phase = SearchPhase::Pending;
        });

        let task = SearchTask {
            catalog: self.catalog.clone(),
            telemetry: self.telemetry.clone(),
            state: self.state.clone(),
            debounce: self.debounce,
        };
        *pending = Some(tokio::spawn(task.run(query)));
    }

    /// Drops the pending timer, if any. Displayed results stay as they are.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
            self.state.send_if_modified(|s| {
                let busy = s.phase != SearchPhase::Idle;
                s.phase = SearchPhase::Idle;
                busy
            });
        }
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

impl Drop for SearchController {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

struct SearchTask {
    catalog: Arc<dyn CatalogApi>,
    telemetry: Arc<dyn SearchTelemetry>,
    state: Arc<watch::Sender<SearchState>>,
    debounce: Duration,
}

impl SearchTask {
    async fn run(self, query: String) {
        tokio::time::sleep(self.debounce).await;

        let term = query.trim().to_string();
        if term.is_empty() {
            self.update(&query, |s| {
                s.movies.clear();
                s.results_for = None;
                s.error = None;
                s.phase = SearchPhase::Idle;
            });
            return;
        }

        self.update(&query, |s| {
            s.phase = SearchPhase::Fetching;
            s.error = None;
        });
        debug!("Searching catalog for '{}'", term);

        match self.catalog.search_movies(&term).await {
            Ok(movies) => {
                debug!("Search for '{}' returned {} movies", term, movies.len());
                let current = self.state.borrow().query == query;
                if !current {
                    debug!("Dropping results for superseded query '{}'", term);
                    return;
                }
                if let Some(top) = movies.first().cloned() {
                    let telemetry = self.telemetry.clone();
                    let reported = term.clone();
                    tokio::spawn(async move {
                        if let Err(e) = telemetry.record_search(&reported, &top).await {
                            debug!("Search telemetry failed for '{}': {:#}", reported, e);
                        }
                    });
                }
                self.update(&query, |s| {
                    s.movies = movies;
                    s.results_for = Some(term);
                    s.phase = SearchPhase::Idle;
                });
            }
            Err(e) => {
                warn!("Search for '{}' failed: {:#}", term, e);
                self.update(&query, |s| {
                    s.movies.clear();
                    s.error = Some(format!("{e:#}"));
                    s.results_for = Some(term);
                    s.phase = SearchPhase::Idle;
                });
            }
        }
    }

    /// Applies `f` only while `query` is still the latest input.
    fn update(&self, query: &str, f: impl FnOnce(&mut SearchState)) {
        self.state.send_if_modified(|s| {
            if s.query != query {
                return false;
            }
            f(s);
            true
        });
    }
}
