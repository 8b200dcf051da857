//! # Library Module
//!
//! Owns the canonical catalog database and the repository layer the sync
//! engine reads and writes through.
//!
//! ## Overview
//!
//! - `models`: artists, albums, tracks and their provider identifiers
//! - `db`: SQLite pool configuration and migrations
//! - `repositories`: [`LibraryStore`] / [`LibrarySession`] and the SQLite implementation
//!
//! Uniqueness of provider identifiers and ISRCs is enforced by the schema;
//! violations and lock contention surface as [`LibraryError::Conflict`] and
//! [`LibraryError::Busy`].

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{Album, Artist, EntityScope, LibraryEntity, ProviderIds, Track};
pub use repositories::{LibrarySession, LibraryStore, SqliteLibrarySession, SqliteLibraryStore};
