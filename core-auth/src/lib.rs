//! # Authentication Module
//!
//! Provider identities and the credentials the sync engine holds for them.
//!
//! ## Overview
//!
//! Token acquisition (OAuth consent screens, PKCE, refresh calls) lives in
//! the host. This crate only keeps what the host hands over and decides,
//! without I/O, whether a provider may be called:
//!
//! - [`ProviderKind`] enumerates the catalog providers
//! - [`OAuthTokens`] and [`ProviderCredential`] describe what is held
//! - [`TokenGate`] answers `has_usable_credential` before every provider call

pub mod error;
pub mod gate;
pub mod types;

pub use error::{AuthError, Result};
pub use gate::TokenGate;
pub use types::{OAuthTokens, ProviderCredential, ProviderKind};
