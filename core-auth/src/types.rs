use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;

/// Supported catalog providers.
///
/// Every provider is addressed through the same catalog contract; this enum
/// is the only thing that tells them apart.
///
/// # Examples
///
/// ```
/// use core_auth::ProviderKind;
///
/// let provider = ProviderKind::MusicBrainz;
/// assert_eq!(provider.display_name(), "MusicBrainz");
/// assert!(!provider.requires_oauth());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Spotify,
    Deezer,
    /// Also the source of the universal MBID
    MusicBrainz,
    Tidal,
}

impl ProviderKind {
    /// Every provider, in declaration order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Spotify,
        ProviderKind::Deezer,
        ProviderKind::MusicBrainz,
        ProviderKind::Tidal,
    ];

    /// Get the human-readable display name for this provider
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Spotify => "Spotify",
            ProviderKind::Deezer => "Deezer",
            ProviderKind::MusicBrainz => "MusicBrainz",
            ProviderKind::Tidal => "Tidal",
        }
    }

    /// Get the provider identifier string
    ///
    /// Used for logging, persistence and event payloads.
    ///
    /// ```
    /// use core_auth::ProviderKind;
    ///
    /// assert_eq!(ProviderKind::Spotify.as_str(), "spotify");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Spotify => "spotify",
            ProviderKind::Deezer => "deezer",
            ProviderKind::MusicBrainz => "musicbrainz",
            ProviderKind::Tidal => "tidal",
        }
    }

    /// Parse a provider kind from a string identifier
    ///
    /// ```
    /// use core_auth::ProviderKind;
    ///
    /// assert_eq!(ProviderKind::parse("Deezer"), Some(ProviderKind::Deezer));
    /// assert_eq!(ProviderKind::parse("napster"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spotify" => Some(ProviderKind::Spotify),
            "deezer" => Some(ProviderKind::Deezer),
            "musicbrainz" | "music_brainz" | "mb" => Some(ProviderKind::MusicBrainz),
            "tidal" => Some(ProviderKind::Tidal),
            _ => None,
        }
    }

    /// Whether the provider needs a user OAuth grant. MusicBrainz is public.
    pub fn requires_oauth(&self) -> bool {
        !matches!(self, ProviderKind::MusicBrainz)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| AuthError::InvalidProvider(s.to_string()))
    }
}

/// OAuth 2.0 token set.
///
/// # Security
///
/// Tokens should never be logged. The `Debug` implementation redacts them.
///
/// # Examples
///
/// ```
/// use core_auth::OAuthTokens;
/// use chrono::{Duration, Utc};
///
/// let tokens = OAuthTokens {
///     access_token: "BQD...".to_string(),
///     refresh_token: "AQA...".to_string(),
///     expires_at: Utc::now() + Duration::hours(1),
/// };
///
/// assert!(!tokens.is_expired());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token used for API requests
    pub access_token: String,
    /// The refresh token used to obtain new access tokens; may be empty
    pub refresh_token: String,
    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

impl OAuthTokens {
    /// Create a new token set expiring `expires_in` seconds from now.
    pub fn new(access_token: String, refresh_token: String, expires_in: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }

    /// Check if the access token is expired or will expire within 5 minutes
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_buffer(300)
    }

    /// Check if the access token is expired with a custom buffer
    pub fn is_expired_with_buffer(&self, buffer_seconds: i64) -> bool {
        self.is_expired_at(Utc::now(), Duration::seconds(buffer_seconds))
    }

    /// Check expiry against an explicit instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now >= self.expires_at - buffer
    }

    /// Whether a refresh token is available to renew an expired access token.
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }

    /// Get the time remaining until token expiration
    ///
    /// Returns `None` if the token is already expired.
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let now = Utc::now();
        if now >= self.expires_at {
            None
        } else {
            Some(self.expires_at - now)
        }
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential held for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tokens", rename_all = "snake_case")]
pub enum ProviderCredential {
    /// Public access, always usable
    Anonymous,
    /// User grant
    OAuth(OAuthTokens),
}

impl ProviderCredential {
    /// Usable at `now` if anonymous, if the access token is valid beyond
    /// `buffer`, or if it can be refreshed.
    pub fn is_usable_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match self {
            ProviderCredential::Anonymous => true,
            ProviderCredential::OAuth(tokens) => {
                !tokens.is_expired_at(now, buffer) || tokens.can_refresh()
            }
        }
    }
}
