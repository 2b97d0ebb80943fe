pub mod config;
pub mod display;
pub mod models;
pub mod search;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod tmdb;
