pub mod batch;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod fetcher;
pub mod model;
pub mod reconcile;
pub mod settings;
pub mod tmdb;
pub mod trakt;
pub mod tvdb;
pub mod update;
