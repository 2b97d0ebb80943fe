use cinelist::models::Movie;
use cinelist::storage::{FileStore, KeyValueStore};
use cinelist::store::{
    FavoritesStore, SavedFilter, StoreEvent, StoreOptions, FAVORITES_KEY, WATCHED_KEY,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Default)]
struct FakeKv {
    values: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    fail_get: bool,
    fail_set: bool,
    get_gate: Option<watch::Receiver<bool>>,
    set_gate: Option<watch::Receiver<bool>>,
}

impl FakeKv {
    fn with_values(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: Mutex::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn last_write(&self, key: &str) -> Option<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FakeKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        if let Some(gate) = &self.get_gate {
            let mut gate = gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }
        if self.fail_get {
            anyhow::bail!("storage unavailable");
        }
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        if let Some(gate) = &self.set_gate {
            let mut gate = gate.clone();
            let _ = gate.wait_for(|open| *open).await;
        }
        if self.fail_set {
            anyhow::bail!("disk full");
        }
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

fn movie(id: i32, title: &str) -> Movie {
    Movie {
        id,
        title: title.to_string(),
        overview: format!("{title} overview"),
        poster_path: Some(format!("/{id}.jpg")),
        release_date: Some("2021-09-15".to_string()),
        vote_average: 7.8,
        vote_count: 1200,
        genre_ids: vec![878, 12],
        ..Default::default()
    }
}

fn ids(movies: &[Movie]) -> Vec<i32> {
    movies.iter().map(|m| m.id).collect()
}

async fn open(kv: Arc<FakeKv>) -> FavoritesStore {
    FavoritesStore::open(kv, StoreOptions::default()).await
}

#[tokio::test]
async fn add_to_favorites_is_idempotent() {
    let store = open(Arc::new(FakeKv::default())).await;
    assert!(store.add_to_favorites(movie(1, "Dune")));
    let once = store.favorites();
    assert!(!store.add_to_favorites(movie(1, "Dune (again)")));
    assert_eq!(store.favorites(), once);
    assert_eq!(store.favorites()[0].title, "Dune");
}

#[tokio::test]
async fn removing_unknown_favorite_is_a_no_op() {
    let kv = Arc::new(FakeKv::default());
    let store = open(kv.clone()).await;
    store.add_to_favorites(movie(1, "Dune"));
    store.flush().await;
    let writes_before = kv.writes.lock().unwrap().len();

    assert!(!store.remove_from_favorites(99));
    store.flush().await;
    assert_eq!(ids(&store.favorites()), vec![1]);
    assert_eq!(kv.writes.lock().unwrap().len(), writes_before);
}

#[tokio::test]
async fn dune_scenario_cascades_watched_on_removal() {
    let kv = Arc::new(FakeKv::default());
    let store = open(kv.clone()).await;
    let mut events = store.subscribe();

    store.add_to_favorites(Movie {
        id: 42,
        title: "Dune".to_string(),
        ..Default::default()
    });
    assert!(store.is_favorite(42));
    store.add_to_watched(42);
    assert!(store.is_watched(42));
    store.remove_from_favorites(42);
    assert!(!store.is_favorite(42));
    assert!(!store.is_watched(42));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            StoreEvent::FavoriteAdded(42),
            StoreEvent::WatchedAdded(42),
            StoreEvent::FavoriteRemoved(42),
            StoreEvent::WatchedRemoved(42),
        ]
    );

    store.flush().await;
    assert_eq!(kv.last_write(FAVORITES_KEY).as_deref(), Some("[]"));
    assert_eq!(kv.last_write(WATCHED_KEY).as_deref(), Some("[]"));
}

#[tokio::test]
async fn watched_is_visible_before_persistence_completes() {
    let (_gate_tx, gate_rx) = watch::channel(false);
    let kv = Arc::new(FakeKv {
        set_gate: Some(gate_rx),
        ..Default::default()
    });
    let store = open(kv.clone()).await;

    store.add_to_watched(7);
    assert!(store.is_watched(7));
    tokio::task::yield_now().await;
    assert!(store.is_watched(7));
    assert!(kv.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn file_store_round_trip_through_fresh_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));

    let store = FavoritesStore::open(kv.clone(), StoreOptions::default()).await;
    store.add_to_favorites(movie(1, "Dune"));
    store.add_to_favorites(movie(2, "Arrival"));
    store.add_to_favorites(movie(3, "Sicario"));
    store.add_to_watched(2);
    store.remove_from_favorites(3);
    store.flush().await;
    let expected = store.favorites();
    drop(store);

    let reopened = FavoritesStore::open(
        Arc::new(FileStore::new(dir.path())),
        StoreOptions::default(),
    )
    .await;
    assert_eq!(reopened.favorites(), expected);
    assert_eq!(reopened.watched_ids(), vec![2]);
    assert!(reopened.is_watched(2));
    assert!(!reopened.is_favorite(3));
}

#[tokio::test]
async fn malformed_snapshot_loads_empty_and_is_rewritten() {
    let kv = Arc::new(FakeKv::with_values(&[
        (FAVORITES_KEY, "{not json"),
        (WATCHED_KEY, "[5, 6]"),
    ]));
    let store = open(kv.clone()).await;
    assert!(store.favorites().is_empty());
    assert_eq!(store.watched_ids(), vec![5, 6]);

    store.add_to_favorites(movie(5, "Heat"));
    store.flush().await;
    let saved: Vec<Movie> =
        serde_json::from_str(&kv.last_write(FAVORITES_KEY).expect("favorites written")).unwrap();
    assert_eq!(ids(&saved), vec![5]);
}

#[tokio::test]
async fn load_failure_yields_empty_store() {
    let kv = Arc::new(FakeKv {
        fail_get: true,
        ..Default::default()
    });
    let store = open(kv).await;
    assert!(store.favorites().is_empty());
    assert!(store.watched_ids().is_empty());
    assert!(store.add_to_favorites(movie(1, "Dune")));
}

#[tokio::test]
async fn persist_failure_keeps_memory_state() {
    let kv = Arc::new(FakeKv {
        fail_set: true,
        ..Default::default()
    });
    let store = open(kv.clone()).await;
    store.add_to_favorites(movie(1, "Dune"));
    store.add_to_watched(1);
    store.flush().await;

    assert!(store.is_favorite(1));
    assert!(store.is_watched(1));
    assert!(kv.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn last_write_reflects_latest_state_after_rapid_mutations() {
    let kv = Arc::new(FakeKv::default());
    let store = open(kv.clone()).await;
    for id in 0..20 {
        store.add_to_favorites(movie(id, "Movie"));
    }
    store.remove_from_favorites(4);
    store.flush().await;

    let saved: Vec<Movie> =
        serde_json::from_str(&kv.last_write(FAVORITES_KEY).expect("favorites written")).unwrap();
    assert_eq!(ids(&saved), ids(&store.favorites()));
    assert_eq!(saved.len(), 19);
}

#[tokio::test]
async fn mutations_before_load_are_merged_with_stored_data() {
    let (gate_tx, gate_rx) = watch::channel(false);
    let stored = serde_json::to_string(&vec![movie(1, "Dune")]).unwrap();
    let mut kv = FakeKv::with_values(&[(FAVORITES_KEY, stored.as_str()), (WATCHED_KEY, "[1]")]);
    kv.get_gate = Some(gate_rx);
    let kv = Arc::new(kv);

    let store = FavoritesStore::spawn(kv.clone(), StoreOptions::default());
    let mut events = store.subscribe();
    assert!(store.favorites().is_empty());
    assert!(!store.is_watched(1));

    store.add_to_favorites(movie(2, "Arrival"));
    assert_eq!(ids(&store.favorites()), vec![2]);

    gate_tx.send(true).unwrap();
    loop {
        if events.recv().await.unwrap() == StoreEvent::Loaded {
            break;
        }
    }
    assert_eq!(ids(&store.favorites()), vec![1, 2]);
    assert!(store.is_watched(1));

    store.flush().await;
    let saved: Vec<Movie> =
        serde_json::from_str(&kv.last_write(FAVORITES_KEY).expect("favorites written")).unwrap();
    assert_eq!(ids(&saved), vec![1, 2]);
}

#[tokio::test]
async fn watched_requires_favorite_when_configured() {
    let store = FavoritesStore::open(
        Arc::new(FakeKv::default()),
        StoreOptions {
            require_favorite_for_watched: true,
        },
    )
    .await;
    assert!(!store.add_to_watched(42));
    assert!(!store.is_watched(42));

    store.add_to_favorites(movie(42, "Dune"));
    assert!(store.add_to_watched(42));
    assert!(store.is_watched(42));
}

#[tokio::test]
async fn watched_without_favorite_is_allowed_by_default() {
    let store = open(Arc::new(FakeKv::default())).await;
    assert!(store.add_to_watched(42));
    assert!(store.is_watched(42));
    assert!(!store.is_favorite(42));
}

#[tokio::test]
async fn unmarking_watched_returns_movie_to_watch_list() {
    let kv = Arc::new(FakeKv::default());
    let store = open(kv.clone()).await;
    let mut events = store.subscribe();

    store.add_to_favorites(movie(1, "Dune"));
    store.add_to_watched(1);
    assert_eq!(ids(&store.saved(SavedFilter::Watched)), vec![1]);

    assert!(store.remove_from_watched(1));
    assert!(!store.is_watched(1));
    assert!(store.is_favorite(1));
    assert_eq!(ids(&store.saved(SavedFilter::ToWatch)), vec![1]);
    assert!(store.saved(SavedFilter::Watched).is_empty());

    store.flush().await;
    assert_eq!(kv.last_write(WATCHED_KEY).as_deref(), Some("[]"));

    let mut removed = 0;
    while let Ok(event) = events.try_recv() {
        if event == StoreEvent::WatchedRemoved(1) {
            removed += 1;
        }
    }
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn watched_marks_before_load_are_checked_against_merged_favorites() {
    let (gate_tx, gate_rx) = watch::channel(false);
    let stored = serde_json::to_string(&vec![movie(1, "Dune")]).unwrap();
    let mut kv = FakeKv::with_values(&[(FAVORITES_KEY, stored.as_str())]);
    kv.get_gate = Some(gate_rx);
    let kv = Arc::new(kv);

    let store = FavoritesStore::spawn(
        kv.clone(),
        StoreOptions {
            require_favorite_for_watched: true,
        },
    );
    let mut events = store.subscribe();
    assert!(store.add_to_watched(1));
    assert!(store.add_to_watched(9));

    gate_tx.send(true).unwrap();
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        if event == StoreEvent::Loaded {
            break;
        }
        seen.push(event);
    }
    assert!(store.is_watched(1));
    assert!(!store.is_watched(9));
    assert!(seen.contains(&StoreEvent::WatchedRemoved(9)));
    assert!(!seen.contains(&StoreEvent::WatchedRemoved(1)));

    store.flush().await;
    assert_eq!(kv.last_write(WATCHED_KEY).as_deref(), Some("[1]"));
}
