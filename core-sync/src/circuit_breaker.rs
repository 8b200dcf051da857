//! # Provider Circuit Breaker
//!
//! Isolates failing providers so a sync run stops calling them for a
//! cooldown period.
//!
//! ## State Machine
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────→ Open
//!     ↑                                │ cooldown elapsed
//!     │ trial succeeds                 ↓
//!     └──────────────────────────── HalfOpen
//!                 trial fails: re-open with a longer cooldown
//! ```
//!
//! State is created lazily per provider and kept behind a synchronous
//! mutex that is never held across an await. Time comes from an injected
//! [`Clock`], so transitions are testable with [`bridge_traits::time::ManualClock`].
//!
//! Callers hold a [`CircuitPermit`] for the duration of the call. A permit
//! dropped without a verdict (a panic, a cancelled future, a permanent
//! error) hands the half-open trial slot back. A trial that is never handed
//! back is considered abandoned once a full cooldown has passed.
//!
//! ```ignore
//! if let Some(permit) = breaker.acquire(ProviderKind::Spotify) {
//!     match provider.fetch_page(&op, None).await {
//!         Ok(_) => permit.succeed(),
//!         Err(e) if e.is_recoverable() => permit.fail(),
//!         Err(_) => drop(permit),
//!     }
//! }
//! ```

use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_auth::ProviderKind;
use core_runtime::config::BreakerSettings;
use core_runtime::events::{CoreEvent, EventBus, ProviderEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit state for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls proceed
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// One trial call is admitted
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one provider's circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub provider: ProviderKind,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub open_until: Option<DateTime<Utc>>,
    /// Cooldown applied on the next (or current) opening
    pub cooldown: Duration,
    pub trial_in_flight: bool,
}

#[derive(Debug, Clone)]
struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
    cooldown: Duration,
    trial_started: Option<DateTime<Utc>>,
}

impl CircuitEntry {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_until: None,
            cooldown,
            trial_started: None,
        }
    }

    fn trial_in_flight(&self) -> bool {
        self.trial_started.is_some()
    }

    /// A trial admitted a full cooldown ago without a verdict.
    fn trial_abandoned(&self, now: DateTime<Utc>) -> bool {
        self.trial_started
            .is_some_and(|started| now >= started + chrono_duration(self.cooldown))
    }

    /// State as seen at `now`: an open circuit whose cooldown has elapsed
    /// reports half-open even before the next acquisition moves it there.
    fn effective_state(&self, now: DateTime<Utc>) -> CircuitState {
        match (self.state, self.open_until) {
            (CircuitState::Open, Some(until)) if now >= until => CircuitState::HalfOpen,
            (state, _) => state,
        }
    }
}

enum Transition {
    Opened { failures: u32, cooldown: Duration },
    HalfOpen,
    Closed,
}

/// Per-provider circuit breaker
pub struct CircuitBreaker {
    settings: BreakerSettings,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<ProviderKind, CircuitEntry>>,
    event_bus: Option<EventBus>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            entries: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    /// Publish circuit transitions as [`ProviderEvent`]s.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProviderKind, CircuitEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask permission to call `provider`, returning a permit that records
    /// the verdict. `None` while the circuit is open or a half-open trial is
    /// already in flight.
    pub fn acquire(&self, provider: ProviderKind) -> Option<CircuitPermit<'_>> {
        self.try_acquire(provider).then(|| CircuitPermit {
            breaker: self,
            provider,
            settled: false,
        })
    }

    /// Bare form of [`CircuitBreaker::acquire`]. The caller must follow up
    /// with `record_success`, `record_failure` or `release`.
    pub fn try_acquire(&self, provider: ProviderKind) -> bool {
        let now = self.clock.now();
        let (admitted, transition) = {
            let mut entries = self.lock();
            let entry = entries
                .entry(provider)
                .or_insert_with(|| CircuitEntry::new(self.settings.cooldown));

            match entry.state {
                CircuitState::Closed => (true, None),
                CircuitState::Open => {
                    if entry.effective_state(now) == CircuitState::HalfOpen {
                        entry.state = CircuitState::HalfOpen;
                        entry.trial_started = Some(now);
                        (true, Some(Transition::HalfOpen))
                    } else {
                        (false, None)
                    }
                }
                CircuitState::HalfOpen => {
                    if !entry.trial_in_flight() {
                        entry.trial_started = Some(now);
                        (true, None)
                    } else if entry.trial_abandoned(now) {
                        warn!(
                            provider = %provider,
                            "Half-open trial never reported back, admitting a new one"
                        );
                        entry.trial_started = Some(now);
                        (true, None)
                    } else {
                        (false, None)
                    }
                }
            }
        };

        if let Some(transition) = transition {
            self.announce(provider, transition);
        }
        if !admitted {
            debug!(provider = %provider, "Circuit rejected call");
        }
        admitted
    }

    /// Record a successful call. Closes the circuit and resets the counter
    /// and cooldown.
    pub fn record_success(&self, provider: ProviderKind) {
        let was_open = {
            let mut entries = self.lock();
            let entry = entries
                .entry(provider)
                .or_insert_with(|| CircuitEntry::new(self.settings.cooldown));
            let was_open = entry.state != CircuitState::Closed;
            *entry = CircuitEntry::new(self.settings.cooldown);
            was_open
        };

        if was_open {
            self.announce(provider, Transition::Closed);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, provider: ProviderKind) {
        let now = self.clock.now();
        let transition = {
            let mut entries = self.lock();
            let entry = entries
                .entry(provider)
                .or_insert_with(|| CircuitEntry::new(self.settings.cooldown));
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);

            match entry.state {
                CircuitState::Closed => {
                    if entry.consecutive_failures >= self.settings.failure_threshold {
                        open(entry, now);
                        Some(Transition::Opened {
                            failures: entry.consecutive_failures,
                            cooldown: entry.cooldown,
                        })
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    entry.cooldown = entry
                        .cooldown
                        .mul_f64(self.settings.cooldown_multiplier)
                        .min(self.settings.max_cooldown);
                    open(entry, now);
                    Some(Transition::Opened {
                        failures: entry.consecutive_failures,
                        cooldown: entry.cooldown,
                    })
                }
                // A call admitted before the circuit opened
                CircuitState::Open => None,
            }
        };

        if let Some(transition) = transition {
            self.announce(provider, transition);
        }
    }

    /// Hand back an admitted call that ended without a health verdict, such
    /// as a permanent error from a reachable provider. Frees the half-open
    /// trial slot and leaves the counters alone.
    pub fn release(&self, provider: ProviderKind) {
        if let Some(entry) = self.lock().get_mut(&provider) {
            if entry.state == CircuitState::HalfOpen {
                entry.trial_started = None;
            }
        }
    }

    /// Current state of `provider`'s circuit.
    pub fn state(&self, provider: ProviderKind) -> CircuitState {
        let now = self.clock.now();
        self.lock()
            .get(&provider)
            .map(|entry| entry.effective_state(now))
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, provider: ProviderKind) -> CircuitSnapshot {
        let now = self.clock.now();
        let entry = self
            .lock()
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| CircuitEntry::new(self.settings.cooldown));

        CircuitSnapshot {
            provider,
            state: entry.effective_state(now),
            consecutive_failures: entry.consecutive_failures,
            open_until: entry.open_until,
            cooldown: entry.cooldown,
            trial_in_flight: entry.trial_in_flight(),
        }
    }

    /// Forget everything about `provider`.
    pub fn reset(&self, provider: ProviderKind) {
        let removed = self.lock().remove(&provider);
        if removed.is_some_and(|entry| entry.state != CircuitState::Closed) {
            self.announce(provider, Transition::Closed);
        }
    }

    fn announce(&self, provider: ProviderKind, transition: Transition) {
        let event = match transition {
            Transition::Opened { failures, cooldown } => {
                warn!(
                    provider = %provider,
                    consecutive_failures = failures,
                    cooldown_secs = cooldown.as_secs(),
                    "Circuit opened"
                );
                ProviderEvent::CircuitOpened {
                    provider: provider.to_string(),
                    consecutive_failures: failures,
                    cooldown_secs: cooldown.as_secs(),
                }
            }
            Transition::HalfOpen => {
                info!(provider = %provider, "Circuit half-open, admitting trial call");
                ProviderEvent::CircuitHalfOpen {
                    provider: provider.to_string(),
                }
            }
            Transition::Closed => {
                info!(provider = %provider, "Circuit closed");
                ProviderEvent::CircuitClosed {
                    provider: provider.to_string(),
                }
            }
        };

        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Provider(event)).ok();
        }
    }
}

fn open(entry: &mut CircuitEntry, now: DateTime<Utc>) {
    entry.state = CircuitState::Open;
    entry.open_until = Some(now + chrono_duration(entry.cooldown));
    entry.trial_started = None;
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

// ============================================================================
// Permit
// ============================================================================

/// Admission to call one provider.
///
/// Consume it with [`succeed`](Self::succeed) or [`fail`](Self::fail).
/// Dropping it otherwise is [`CircuitBreaker::release`].
#[must_use = "dropping the permit releases it without a verdict"]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    provider: ProviderKind,
    settled: bool,
}

impl CircuitPermit<'_> {
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.provider);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.provider);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.provider);
        }
    }
}

impl fmt::Debug for CircuitPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitPermit")
            .field("provider", &self.provider)
            .field("settled", &self.settled)
            .finish()
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("providers", &self.lock().len())
            .finish()
    }
}
