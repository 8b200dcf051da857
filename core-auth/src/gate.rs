//! # Token Gate
//!
//! Answers one question before every provider call: does the engine hold a
//! credential for this provider that can be used right now? The check is
//! synchronous and never touches the network; acquiring or refreshing tokens
//! is the host's business.
//!
//! The gate is an ordinary value handed to whoever needs it, so tests and
//! multiple engines in one process never share credentials by accident.
//!
//! ```ignore
//! use bridge_traits::time::SystemClock;
//! use core_auth::{OAuthTokens, ProviderCredential, ProviderKind, TokenGate};
//! use std::sync::Arc;
//!
//! let gate = TokenGate::new(Arc::new(SystemClock));
//! gate.set_credential(ProviderKind::MusicBrainz, ProviderCredential::Anonymous)?;
//! gate.set_credential(
//!     ProviderKind::Spotify,
//!     ProviderCredential::OAuth(OAuthTokens::new(access, refresh, 3600)),
//! )?;
//!
//! assert!(gate.has_usable_credential(ProviderKind::Spotify));
//! ```

use bridge_traits::time::Clock;
use chrono::Duration;
use core_runtime::events::{CoreEvent, EventBus, ProviderEvent};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{AuthError, Result};
use crate::types::{ProviderCredential, ProviderKind};

/// Default margin before expiry at which an access token stops counting as valid.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

/// Credential registry consulted before provider calls.
pub struct TokenGate {
    credentials: RwLock<HashMap<ProviderKind, ProviderCredential>>,
    clock: Arc<dyn Clock>,
    expiry_buffer: Duration,
    event_bus: Option<EventBus>,
}

impl TokenGate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            clock,
            expiry_buffer: Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS),
            event_bus: None,
        }
    }

    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    /// Publish `ProviderEvent::CredentialChanged` on this bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Store or replace the credential for `provider`.
    ///
    /// An OAuth grant without an access token is rejected.
    pub fn set_credential(
        &self,
        provider: ProviderKind,
        credential: ProviderCredential,
    ) -> Result<()> {
        if let ProviderCredential::OAuth(tokens) = &credential {
            if tokens.access_token.trim().is_empty() {
                return Err(AuthError::InvalidCredential {
                    provider: provider.to_string(),
                    reason: "access token is empty".to_string(),
                });
            }
        }

        self.credentials
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(provider, credential);

        info!(provider = %provider, "Credential stored");
        self.emit_changed(provider, true);
        Ok(())
    }

    /// Forget the credential for `provider`. Returns whether one was held.
    pub fn revoke(&self, provider: ProviderKind) -> bool {
        let removed = self
            .credentials
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&provider)
            .is_some();

        if removed {
            info!(provider = %provider, "Credential revoked");
            self.emit_changed(provider, false);
        }
        removed
    }

    /// Whether a provider call may be attempted now.
    pub fn has_usable_credential(&self, provider: ProviderKind) -> bool {
        let now = self.clock.now();
        let usable = self
            .credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&provider)
            .is_some_and(|credential| credential.is_usable_at(now, self.expiry_buffer));

        if !usable {
            debug!(provider = %provider, "No usable credential");
        }
        usable
    }

    /// Providers currently holding a usable credential, in declaration order.
    pub fn connected_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|provider| self.has_usable_credential(*provider))
            .collect()
    }

    fn emit_changed(&self, provider: ProviderKind, connected: bool) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Provider(ProviderEvent::CredentialChanged {
                provider: provider.as_str().to_string(),
                connected,
            }))
            .ok();
        }
    }
}

impl std::fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers: Vec<ProviderKind> = self
            .credentials
            .read()
            .map(|map| map.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("TokenGate")
            .field("providers", &providers)
            .field("expiry_buffer", &self.expiry_buffer)
            .finish()
    }
}
