//! feedmill: syndication feed ingestion.
//!
//! Fetches RSS, RDF and Atom feeds from a catalog of source URLs, normalizes
//! their entries into one record shape and stores each distinct
//! `(title, link)` pair exactly once in SQLite.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod normalize;
pub mod storage;
