//! Plain-text rendering for the terminal front end.
use std::fmt::Write;

use crate::models::{Movie, MovieDetail};
use crate::store::SavedFilter;
use crate::telemetry::TrendingSearch;
use crate::tmdb::poster_url;

const NA: &str = "N/A";

pub fn movie_line(movie: &Movie, favorite: bool, watched: bool) -> String {
    let marker = match (favorite, watched) {
        (true, true) => "[x]",
        (true, false) => "[ ]",
        _ => "   ",
    };
    let year = movie.year().unwrap_or("----");
    format!(
        "{marker} {:>8}  {} ({year})  {}/10",
        movie.id,
        movie.title,
        rating(movie.vote_average)
    )
}

pub fn detail_sheet(detail: &MovieDetail, favorite: bool, watched: bool) -> String {
    let mut out = String::new();
    let year = detail
        .release_date
        .as_deref()
        .and_then(|d| d.split('-').next())
        .unwrap_or(NA);
    let _ = writeln!(out, "{} ({})", detail.title, year);
    if let Some(runtime) = detail.runtime.filter(|r| *r > 0) {
        let _ = writeln!(out, "{}m", runtime);
    }
    let _ = writeln!(
        out,
        "{}/10 ({} votes)",
        rating(detail.vote_average),
        detail.vote_count
    );
    let _ = writeln!(
        out,
        "{}{}",
        if favorite { "In favorites" } else { "Not in favorites" },
        if favorite && watched { ", watched" } else { "" }
    );
    if let Some(url) = poster_url(detail.poster_path.as_deref()) {
        let _ = writeln!(out, "Poster: {url}");
    }
    field(&mut out, "Overview", non_empty(&detail.overview));
    field(
        &mut out,
        "Genres",
        join_names(detail.genres.iter().map(|g| g.name.as_str())),
    );
    field(&mut out, "Budget", Some(millions(detail.budget)));
    field(&mut out, "Revenue", Some(millions(detail.revenue)));
    field(
        &mut out,
        "Production Companies",
        join_names(detail.production_companies.iter().map(|c| c.name.as_str())),
    );
    out
}

pub fn saved_heading(filter: SavedFilter) -> &'static str {
    match filter {
        SavedFilter::ToWatch => "Movies to Watch",
        SavedFilter::Watched => "Watched Movies",
    }
}

pub fn saved_empty(filter: SavedFilter) -> &'static str {
    match filter {
        SavedFilter::ToWatch => "No movies to watch yet.",
        SavedFilter::Watched => "No watched movies yet.",
    }
}

pub fn trending_line(rank: usize, row: &TrendingSearch) -> String {
    format!(
        "{:>2}. {} ({} searches for \"{}\")",
        rank, row.title, row.count, row.search_term
    )
}

fn rating(vote_average: f32) -> i32 {
    vote_average.round() as i32
}

fn millions(amount: Option<u64>) -> String {
    let m = amount.unwrap_or(0) as f64 / 1_000_000.0;
    format!("${} million", m.round())
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = names.collect::<Vec<_>>().join(" • ");
    (!joined.is_empty()).then_some(joined)
}

fn field(out: &mut String, label: &str, value: Option<String>) {
    let _ = writeln!(out, "\n{label}\n  {}", value.as_deref().unwrap_or(NA));
}
