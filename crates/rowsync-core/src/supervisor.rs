// ── Connection supervisor ──
//
// Pure state machine for one physical connection. It owns no I/O: the
// connection task feeds it inputs and acts on what comes back (publish a
// state, signal a resync, sleep for a backoff delay).

use std::collections::hash_map::DefaultHasher;
use std::f64::consts::TAU;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use rowsync_api::TransportFilter;

// ── ConnectionState ──────────────────────────────────────────────────

/// Lifecycle of one physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// The server acknowledged the subscription. Changes are flowing.
    Subscribed,
    /// The connection failed; a reconnect is scheduled.
    Degraded { reason: String },
}

impl ConnectionState {
    pub fn is_subscribed(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Subscribed => f.write_str("subscribed"),
            Self::Degraded { reason } => write!(f, "degraded ({reason})"),
        }
    }
}

// ── Inputs and transitions ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum SupervisorInput {
    Connect,
    Ack,
    Error(String),
    Close,
}

/// Result of an accepted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ConnectionState,
    /// Set on every `Subscribed` after the first: whatever happened while
    /// disconnected was not delivered and consumers must reload.
    pub resync_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("input {input} is not valid while {state}")]
pub struct InvalidTransition {
    pub state: ConnectionState,
    pub input: SupervisorInput,
}

// ── Backoff ──────────────────────────────────────────────────────────

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry. Default: 1s.
    pub initial: Duration,
    /// Upper bound on the delay (before jitter). Default: 30s.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// `min(initial * 2^attempt, max)`, scaled by +-25% jitter.
    ///
    /// The jitter is deterministic in `(attempt, seed)`. Different seeds
    /// spread concurrent connections apart.
    pub fn delay(&self, attempt: u32, seed: f64) -> Duration {
        let base = self.initial.as_secs_f64() * 2.0_f64.powi(attempt.min(31) as i32);
        let capped = base.min(self.max.as_secs_f64());

        let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3 + seed).sin();
        Duration::from_secs_f64((capped * jitter_factor).max(0.0))
    }
}

/// Jitter seed for a connection, stable per filter.
pub fn jitter_seed(filter: &TransportFilter) -> f64 {
    let mut hasher = DefaultHasher::new();
    filter.hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0 * TAU
}

// ── ConnectionSupervisor ─────────────────────────────────────────────

/// State machine for one connection.
///
/// ```text
/// Disconnected --Connect--> Connecting --Ack--> Subscribed
/// Connecting/Subscribed --Error--> Degraded --Connect--> Connecting
/// any --Close--> Disconnected
/// ```
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    backoff: BackoffConfig,
    stability_window: Duration,
    seed: f64,
    attempt: u32,
    subscribed_since: Option<Instant>,
    has_subscribed: bool,
}

impl ConnectionSupervisor {
    pub fn new(backoff: BackoffConfig, stability_window: Duration, seed: f64) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff,
            stability_window,
            seed,
            attempt: 0,
            subscribed_since: None,
            has_subscribed: false,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Consecutive failed attempts since the last stable subscription.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Feed one input. Invalid inputs leave the state untouched.
    pub fn handle(
        &mut self,
        input: SupervisorInput,
        now: Instant,
    ) -> Result<Transition, InvalidTransition> {
        let next = match (&self.state, &input) {
            (
                ConnectionState::Disconnected | ConnectionState::Degraded { .. },
                SupervisorInput::Connect,
            ) => ConnectionState::Connecting,
            (ConnectionState::Connecting, SupervisorInput::Ack) => ConnectionState::Subscribed,
            (
                ConnectionState::Connecting | ConnectionState::Subscribed,
                SupervisorInput::Error(reason),
            ) => ConnectionState::Degraded {
                reason: reason.clone(),
            },
            (_, SupervisorInput::Close) => ConnectionState::Disconnected,
            _ => {
                return Err(InvalidTransition {
                    state: self.state.clone(),
                    input: input.clone(),
                });
            }
        };

        let mut resync_required = false;
        match next {
            ConnectionState::Subscribed => {
                resync_required = self.has_subscribed;
                self.has_subscribed = true;
                self.subscribed_since = Some(now);
            }
            ConnectionState::Degraded { .. } | ConnectionState::Disconnected => {
                self.end_subscribed_period(now);
            }
            ConnectionState::Connecting => {}
        }

        self.state = next.clone();
        Ok(Transition {
            state: next,
            resync_required,
        })
    }

    /// Delay before the next reconnect. Each call counts as one attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.backoff.delay(self.attempt, self.seed);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn end_subscribed_period(&mut self, now: Instant) {
        if let Some(since) = self.subscribed_since.take() {
            if now.saturating_duration_since(since) >= self.stability_window {
                self.attempt = 0;
            }
        }
    }
}
