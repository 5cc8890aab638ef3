//! Transit snapshot engine: keeps an embedded SQLite mirror of a transit
//! agency's static schedule and its three live feeds, and answers
//! mode-class-filtered geospatial queries against it.

pub mod config;
pub mod db;
pub mod derive;
pub mod error;
pub mod features;
pub mod query;
pub mod realtime;
pub mod schedule;
pub mod scheduler;
