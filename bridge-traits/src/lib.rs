//! # Host Bridge Traits
//!
//! Contracts between the sync core and the world outside it.
//!
//! ## Overview
//!
//! The core never talks to a music service or reads the wall clock directly.
//! Everything it needs from outside is expressed here as a trait so hosts can
//! plug in real adapters and tests can plug in deterministic ones.
//!
//! ## Traits
//!
//! - [`CatalogProvider`](provider::CatalogProvider) - Paginated catalog listings from an
//!   external music service
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! Adapters convert their failures into [`BridgeError`](error::BridgeError). The
//! variant decides whether the core retries: `Network`, `RateLimited` and
//! `Unavailable` are recoverable, everything else is permanent.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so adapters can be shared
//! across async tasks behind an `Arc`.
//!
//! ## Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use bridge_traits::error::Result;
//! use bridge_traits::provider::{CandidatePage, CatalogOperation, CatalogProvider};
//!
//! struct DeezerCatalog { /* http client, credentials */ }
//!
//! #[async_trait]
//! impl CatalogProvider for DeezerCatalog {
//!     async fn fetch_page(
//!         &self,
//!         operation: &CatalogOperation,
//!         cursor: Option<String>,
//!     ) -> Result<CandidatePage> {
//!         // call the API, map the payload into SyncCandidates
//!         todo!()
//!     }
//!
//!     fn supports(&self, operation: &CatalogOperation) -> bool {
//!         !matches!(operation, CatalogOperation::FollowedArtists)
//!     }
//! }
//! ```

pub mod error;
pub mod provider;
pub mod time;

pub use error::{BridgeError, Result};
pub use provider::{
    CandidateMetadata, CandidatePage, CatalogOperation, CatalogProvider, EntityKind,
    SyncCandidate,
};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
