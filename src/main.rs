use anyhow::{anyhow, Result};
use cinelist::config::Config;
use cinelist::display;
use cinelist::search::{SearchController, SearchPhase, SearchState};
use cinelist::storage::FileStore;
use cinelist::store::{FavoritesStore, SavedFilter};
use cinelist::telemetry::{AppwriteTelemetry, NoopTelemetry, SearchTelemetry};
use cinelist::tmdb::{parse_tmdb_id, CatalogApi, TmdbClient};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cinelist", version, about = "Search TMDB and keep a personal watch list")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the catalog once
    Search { query: Vec<String> },
    /// Most popular movies right now
    Popular,
    /// Show the detail sheet for a TMDB id or URL
    Details { id: String },
    /// Save a movie to favorites
    Add { id: String },
    /// Remove a movie from favorites (and from watched)
    Remove { id: String },
    /// Mark a favorite as watched
    Watched { id: String },
    /// Clear the watched mark
    Unwatched { id: String },
    /// List saved movies
    List {
        #[arg(long)]
        watched: bool,
    },
    /// Most searched terms
    Trending {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Type queries line by line; results appear once typing pauses
    Interactive,
}

struct Services {
    catalog: Arc<dyn CatalogApi>,
    telemetry: Arc<dyn SearchTelemetry>,
    store: FavoritesStore,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv_result = dotenv();
    init_tracing();
    match dotenv_result {
        Ok(path) => debug!("Loaded environment from {:?}", path),
        Err(e) => debug!("No .env file loaded ({}) - relying on environment", e),
    }

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let catalog: Arc<dyn CatalogApi> = Arc::new(TmdbClient::new(config.tmdb_api_key.clone())?);
    let telemetry: Arc<dyn SearchTelemetry> = match config.appwrite.clone() {
        Some(appwrite) => Arc::new(AppwriteTelemetry::new(appwrite)?),
        None => Arc::new(NoopTelemetry),
    };
    let kv = Arc::new(FileStore::new(config.data_dir.clone()));
    info!("Using data directory {}", kv.dir().display());
    let store = FavoritesStore::open(kv, config.store.clone()).await;

    let services = Services {
        catalog,
        telemetry,
        store,
    };
    let result = run(cli.command, &services, &config).await;
    services.store.flush().await;
    result
}

async fn run(command: Command, services: &Services, config: &Config) -> Result<()> {
    let store = &services.store;
    match command {
        Command::Search { query } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                return Err(anyhow!("Search query is empty"));
            }
            let movies = services.catalog.search_movies(&query).await?;
            if let Some(top) = movies.first() {
                if let Err(e) = services.telemetry.record_search(query.trim(), top).await {
                    debug!("Search telemetry failed: {:#}", e);
                }
            }
            print_movies(&movies, store, "No movies found");
        }
        Command::Popular => {
            let movies = services.catalog.popular_movies().await?;
            print_movies(&movies, store, "No movies found");
        }
        Command::Details { id } => {
            let id = parse_id(&id)?;
            let detail = services.catalog.movie_details(id).await?;
            print!(
                "{}",
                display::detail_sheet(&detail, store.is_favorite(id), store.is_watched(id))
            );
        }
        Command::Add { id } => {
            let id = parse_id(&id)?;
            if store.is_favorite(id) {
                println!("Movie {id} is already in favorites");
                return Ok(());
            }
            let detail = services.catalog.movie_details(id).await?;
            store.add_to_favorites(detail.to_movie());
            println!("Added \"{}\" to favorites", detail.title);
        }
        Command::Remove { id } => {
            let id = parse_id(&id)?;
            if store.remove_from_favorites(id) {
                println!("Removed movie {id} from favorites");
            } else {
                println!("Movie {id} is not in favorites");
            }
        }
        Command::Watched { id } => {
            let id = parse_id(&id)?;
            if store.add_to_watched(id) {
                println!("Marked movie {id} as watched");
            } else if store.is_watched(id) {
                println!("Movie {id} is already watched");
            } else {
                println!("Movie {id} must be in favorites before it can be marked watched");
            }
        }
        Command::Unwatched { id } => {
            let id = parse_id(&id)?;
            if store.remove_from_watched(id) {
                println!("Movie {id} is back on the to-watch list");
            } else {
                println!("Movie {id} was not marked watched");
            }
        }
        Command::List { watched } => {
            let filter = if watched {
                SavedFilter::Watched
            } else {
                SavedFilter::ToWatch
            };
            println!("{}", display::saved_heading(filter));
            print_movies(&store.saved(filter), store, display::saved_empty(filter));
        }
        Command::Trending { limit } => {
            let rows = services.telemetry.trending(limit).await?;
            if rows.is_empty() {
                println!("No trending searches");
            }
            for (i, row) in rows.iter().enumerate() {
                println!("{}", display::trending_line(i + 1, row));
            }
        }
        Command::Interactive => interactive(services, config).await?,
    }
    Ok(())
}

async fn interactive(services: &Services, config: &Config) -> Result<()> {
    let controller = SearchController::new(
        services.catalog.clone(),
        services.telemetry.clone(),
        config.search_debounce,
    );
    let store = services.store.clone();
    let mut rx = controller.subscribe();
    let printer = tokio::spawn(async move {
        let mut last: Option<SearchState> = None;
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if state.phase != SearchPhase::Idle || last.as_ref() == Some(&state) {
                continue;
            }
            render_search(&state, &store);
            last = Some(state);
        }
    });

    println!("Start typing to search for movies (Ctrl-D to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => controller.set_query(line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(controller);
    printer.abort();
    Ok(())
}

fn render_search(state: &SearchState, store: &FavoritesStore) {
    if let Some(error) = &state.error {
        println!("Error: {error}");
        return;
    }
    match &state.results_for {
        Some(query) if !state.movies.is_empty() => {
            println!("Search results for {query}");
            print_movies(&state.movies, store, "No movies found");
        }
        Some(_) => println!("No movies found"),
        None => println!("Start typing to search for movies"),
    }
}

fn print_movies(movies: &[cinelist::models::Movie], store: &FavoritesStore, empty: &str) {
    if movies.is_empty() {
        println!("{empty}");
        return;
    }
    for movie in movies {
        println!(
            "{}",
            display::movie_line(movie, store.is_favorite(movie.id), store.is_watched(movie.id))
        );
    }
}

fn parse_id(input: &str) -> Result<i32> {
    parse_tmdb_id(input).ok_or_else(|| anyhow!("Not a TMDB movie id: '{}'", input))
}
