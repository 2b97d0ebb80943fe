//! In-memory favorites and watched list mirrored to a [`KeyValueStore`].
//!
//! Reads and writes are synchronous against memory. Every effective mutation
//! captures a full JSON snapshot of the touched collection and hands it to that
//! collection's writer task, which always writes the newest snapshot it has
//! been given. Storage failures are logged and never reach the caller.
use crate::models::Movie;
use crate::storage::KeyValueStore;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

pub const FAVORITES_KEY: &str = "favorites";
pub const WATCHED_KEY: &str = "watchedMovies";

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Ignore `add_to_watched` for ids that are not currently favorites.
    /// Marks made before the stored snapshot is applied are checked once it
    /// lands, against the merged favorites.
    pub require_favorite_for_watched: bool,
}

/// Emitted after each mutation that changed state, and once when the
/// persisted snapshot has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Loaded,
    FavoriteAdded(i32),
    FavoriteRemoved(i32),
    WatchedAdded(i32),
    WatchedRemoved(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedFilter {
    ToWatch,
    Watched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    pub favorites: usize,
    pub watched: usize,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    version: u64,
    json: Option<String>,
}

#[derive(Default)]
struct State {
    favorites: Vec<Movie>,
    watched: Vec<i32>,
    favorites_version: u64,
    watched_version: u64,
    loaded: bool,
}

struct Channel {
    key: &'static str,
    pending: watch::Sender<Snapshot>,
    written: Arc<watch::Sender<u64>>,
}

impl Channel {
    fn new(key: &'static str) -> Self {
        let (pending, _) = watch::channel(Snapshot::default());
        let (written, _) = watch::channel(0);
        Self {
            key,
            pending,
            written: Arc::new(written),
        }
    }

    fn publish<T: Serialize>(&self, version: u64, items: &[T]) {
        let json = match serde_json::to_string(items) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to serialize {}: {}", self.key, e);
                None
            }
        };
        self.pending.send_replace(Snapshot { version, json });
    }

    async fn wait_written(&self, version: u64) {
        let mut rx = self.written.subscribe();
        let _ = rx.wait_for(|v| *v >= version).await;
    }
}

struct Inner {
    state: Mutex<State>,
    options: StoreOptions,
    favorites: Channel,
    watched: Channel,
    events: broadcast::Sender<StoreEvent>,
}

/// Shared handle to the favorites and watched collections. Clones refer to
/// the same store.
#[derive(Clone)]
pub struct FavoritesStore {
    inner: Arc<Inner>,
}

impl FavoritesStore {
    /// Returns immediately and loads the persisted snapshot in the background.
    /// Until the load lands both collections read as empty.
    pub fn spawn(kv: Arc<dyn KeyValueStore>, options: StoreOptions) -> Self {
        let store = Self::unloaded(options);
        let task_store = store.clone();
        tokio::spawn(async move { task_store.start(kv).await });
        store
    }

    /// Like [`FavoritesStore::spawn`] but returns once the snapshot is applied.
    pub async fn open(kv: Arc<dyn KeyValueStore>, options: StoreOptions) -> Self {
        let store = Self::unloaded(options);
        store.start(kv).await;
        store
    }

    fn unloaded(options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                options,
                favorites: Channel::new(FAVORITES_KEY),
                watched: Channel::new(WATCHED_KEY),
                events,
            }),
        }
    }

    async fn start(&self, kv: Arc<dyn KeyValueStore>) {
        let favorites = load_collection::<Movie>(kv.as_ref(), FAVORITES_KEY).await;
        let watched = load_collection::<i32>(kv.as_ref(), WATCHED_KEY).await;
        self.apply_loaded(favorites, watched);

        for channel in [&self.inner.favorites, &self.inner.watched] {
            tokio::spawn(run_writer(
                kv.clone(),
                channel.key,
                channel.pending.subscribe(),
                channel.written.clone(),
            ));
        }
    }

    /// Merges the stored collections with anything added before loading
    /// finished. Stored entries come first.
    fn apply_loaded(&self, stored_favorites: Vec<Movie>, stored_watched: Vec<i32>) {
        let mut rejected = Vec::new();
        {
            let mut state = self.inner.state.lock();

            let mut favorites: Vec<Movie> = Vec::with_capacity(stored_favorites.len());
            for movie in stored_favorites.into_iter().chain(state.favorites.drain(..)) {
                if !favorites.iter().any(|m| m.id == movie.id) {
                    favorites.push(movie);
                }
            }
            let mut watched: Vec<i32> = Vec::with_capacity(stored_watched.len());
            for id in stored_watched {
                if !watched.contains(&id) {
                    watched.push(id);
                }
            }
            for id in state.watched.drain(..) {
                if watched.contains(&id) {
                    continue;
                }
                if self.inner.options.require_favorite_for_watched
                    && !favorites.iter().any(|m| m.id == id)
                {
                    debug!("Dropping watched mark for non-favorite movie {}", id);
                    rejected.push(id);
                    continue;
                }
                watched.push(id);
            }

            info!(
                "Loaded {} favorites and {} watched movies",
                favorites.len(),
                watched.len()
            );
            state.favorites = favorites;
            state.watched = watched;
            state.loaded = true;

            if state.favorites_version > 0 {
                self.commit_favorites(&mut state);
            }
            if state.watched_version > 0 {
                self.commit_watched(&mut state);
            }
        }
        for id in rejected {
            self.emit(StoreEvent::WatchedRemoved(id));
        }
        self.emit(StoreEvent::Loaded);
    }

    pub fn add_to_favorites(&self, movie: Movie) -> bool {
        let id = movie.id;
        {
            let mut state = self.inner.state.lock();
            if state.favorites.iter().any(|m| m.id == id) {
                return false;
            }
            let mut favorites = state.favorites.clone();
            favorites.push(movie);
            state.favorites = favorites;
            self.commit_favorites(&mut state);
        }
        debug!("Added movie {} to favorites", id);
        self.emit(StoreEvent::FavoriteAdded(id));
        true
    }

    /// Also drops `id` from the watched list so no watched entry outlives its
    /// favorite.
    pub fn remove_from_favorites(&self, id: i32) -> bool {
        let was_watched = {
            let mut state = self.inner.state.lock();
            if !state.favorites.iter().any(|m| m.id == id) {
                return false;
            }
            state.favorites = state
                .favorites
                .iter()
                .filter(|m| m.id != id)
                .cloned()
                .collect();
            self.commit_favorites(&mut state);

            let was_watched = state.watched.contains(&id);
            if was_watched {
                state.watched = state.watched.iter().copied().filter(|w| *w != id).collect();
                self.commit_watched(&mut state);
            }
            was_watched
        };
        debug!("Removed movie {} from favorites", id);
        self.emit(StoreEvent::FavoriteRemoved(id));
        if was_watched {
            self.emit(StoreEvent::WatchedRemoved(id));
        }
        true
    }

    pub fn is_favorite(&self, id: i32) -> bool {
        self.inner.state.lock().favorites.iter().any(|m| m.id == id)
    }

    pub fn add_to_watched(&self, id: i32) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.watched.contains(&id) {
                return false;
            }
            if self.inner.options.require_favorite_for_watched
                && state.loaded
                && !state.favorites.iter().any(|m| m.id == id)
            {
                debug!("Ignoring watched mark for non-favorite movie {}", id);
                return false;
            }
            let mut watched = state.watched.clone();
            watched.push(id);
            state.watched = watched;
            self.commit_watched(&mut state);
        }
        debug!("Marked movie {} as watched", id);
        self.emit(StoreEvent::WatchedAdded(id));
        true
    }

    pub fn remove_from_watched(&self, id: i32) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.watched.contains(&id) {
                return false;
            }
            state.watched = state.watched.iter().copied().filter(|w| *w != id).collect();
            self.commit_watched(&mut state);
        }
        debug!("Unmarked movie {} as watched", id);
        self.emit(StoreEvent::WatchedRemoved(id));
        true
    }

    pub fn is_watched(&self, id: i32) -> bool {
        self.inner.state.lock().watched.contains(&id)
    }

    pub fn favorites(&self) -> Vec<Movie> {
        self.inner.state.lock().favorites.clone()
    }

    pub fn watched_ids(&self) -> Vec<i32> {
        self.inner.state.lock().watched.clone()
    }

    /// Favorites split by watched status, in insertion order.
    pub fn saved(&self, filter: SavedFilter) -> Vec<Movie> {
        let state = self.inner.state.lock();
        state
            .favorites
            .iter()
            .filter(|m| {
                let watched = state.watched.contains(&m.id);
                match filter {
                    SavedFilter::ToWatch => !watched,
                    SavedFilter::Watched => watched,
                }
            })
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> Counts {
        let state = self.inner.state.lock();
        Counts {
            favorites: state.favorites.len(),
            watched: state.watched.len(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Waits until every snapshot issued so far has been handed to storage.
    /// A failed write counts as handled.
    pub async fn flush(&self) {
        let (favorites, watched) = {
            let state = self.inner.state.lock();
            (state.favorites_version, state.watched_version)
        };
        self.inner.favorites.wait_written(favorites).await;
        self.inner.watched.wait_written(watched).await;
    }

    fn commit_favorites(&self, state: &mut State) {
        state.favorites_version += 1;
        self.inner
            .favorites
            .publish(state.favorites_version, &state.favorites);
    }

    fn commit_watched(&self, state: &mut State) {
        state.watched_version += 1;
        self.inner
            .watched
            .publish(state.watched_version, &state.watched);
    }

    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

async fn load_collection<T: DeserializeOwned>(kv: &dyn KeyValueStore, key: &str) -> Vec<T> {
    let raw = match kv.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("Error loading {}: {:#}", key, e);
            return Vec::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(e) => {
            warn!("Discarding malformed {} snapshot: {}", key, e);
            Vec::new()
        }
    }
}

async fn run_writer(
    kv: Arc<dyn KeyValueStore>,
    key: &'static str,
    mut pending: watch::Receiver<Snapshot>,
    written: Arc<watch::Sender<u64>>,
) {
    loop {
        let snapshot = pending.borrow_and_update().clone();
        let last_written = *written.borrow();
        if snapshot.version > last_written {
            if let Some(json) = snapshot.json.as_deref() {
                match kv.set(key, json).await {
                    Ok(()) => debug!("Saved {} (version {})", key, snapshot.version),
                    Err(e) => warn!("Error saving {}: {:#}", key, e),
                }
            }
            written.send_replace(snapshot.version);
        }
        if pending.changed().await.is_err() {
            break;
        }
    }
}
