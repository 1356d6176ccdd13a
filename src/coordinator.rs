//! Turn coordinator: mutual exclusion and round-robin fairness over the
//! shared scheduler document.
//!
//! A worker asks for the turn with [`TurnCoordinator::attempt_turn`]. The
//! whole decision happens inside one store transaction through the pure
//! function [`decide`]:
//!
//! 1. No document: create it with this worker as the only registrant. No turn.
//! 2. Held for longer than the timeout: clear `running` locally.
//! 3. Still held, or nobody registered: abort.
//! 4. Pull the pointer back into range if the registry shrank.
//! 5. Pointer names someone else: abort.
//! 6. Pointer names us: take the turn, stamp the start time, advance the
//!    pointer.
//!
//! An abort discards everything, including the reset from step 2. With the
//! default [`RecoveryMode::NextInLine`] a stale lock is therefore only
//! cleared by the worker the pointer already names, in the same step that
//! grants it the turn. If that worker is down the lock stays held until it
//! comes back. [`RecoveryMode::AnyWorker`] lets a registered worker that is
//! not next take the turn itself once the rotation is overdue: the lock is
//! stale, or the pointer has sat idle on the same worker for longer than the
//! timeout since the last run started. The pointer then moves on from the
//! worker that took over, skipping whoever failed to show up.
//!
//! Releasing is a plain write of `running = false` and never touches the
//! pointer, which already moved on when the turn was granted.

use crate::clock::Clock;
use crate::config::DEFAULT_JOB_TIMEOUT;
use crate::error::{Error, Result};
use crate::model::{SchedulerState, ServerId};
use crate::store::{DocumentStore, TxOutcome, Update};
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Who may commit the reset of a stale lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Only the worker at the pointer, and only together with its own grant.
    #[default]
    NextInLine,
    /// Any registered worker that finds the rotation overdue takes the turn
    /// and the pointer resumes after it.
    AnyWorker,
}

impl std::fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryMode::NextInLine => f.write_str("next-in-line"),
            RecoveryMode::AnyWorker => f.write_str("any-worker"),
        }
    }
}

impl std::str::FromStr for RecoveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "next-in-line" | "next_in_line" => Ok(RecoveryMode::NextInLine),
            "any-worker" | "any_worker" => Ok(RecoveryMode::AnyWorker),
            other => Err(Error::Config(format!(
                "unknown recovery mode {other:?}, expected next-in-line or any-worker"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnPolicy {
    /// How long a turn may be held before others treat it as abandoned.
    pub timeout: Duration,
    pub recovery: RecoveryMode,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_JOB_TIMEOUT,
            recovery: RecoveryMode::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// The reason behind a [`Decision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// This worker takes the turn.
    Grant,
    /// The document did not exist and was created with this worker in it.
    Initialize,
    /// This worker takes the turn out of order because `skipped` never
    /// claimed it (`AnyWorker` only).
    Takeover { skipped: Option<ServerId> },
    /// Another worker holds the turn.
    Busy,
    /// The registry is empty.
    NoServers,
    /// The pointer names another worker.
    NotNext { next: Option<ServerId> },
}

/// What [`decide`] wants the store to do, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub update: Update,
    pub verdict: Verdict,
    /// The observed lock was past the timeout.
    pub stale: bool,
}

/// Evaluate one turn attempt by `id` at `now` against the current document.
pub fn decide(
    current: Option<SchedulerState>,
    id: &ServerId,
    now: DateTime<Utc>,
    policy: &TurnPolicy,
) -> Decision {
    let Some(mut state) = current else {
        return Decision {
            update: Update::Commit(SchedulerState::new(id.clone())),
            verdict: Verdict::Initialize,
            stale: false,
        };
    };

    let stale = state.is_stale(now, policy.timeout);
    if stale {
        state.running = false;
    }
    if state.running {
        return Decision {
            update: Update::Abort,
            verdict: Verdict::Busy,
            stale,
        };
    }
    if state.servers.is_empty() {
        return Decision {
            update: Update::Abort,
            verdict: Verdict::NoServers,
            stale,
        };
    }

    state.repair_pointer();

    if state.next_server() != Some(id) {
        let next = state.next_server().cloned();
        let takeover = match policy.recovery {
            RecoveryMode::AnyWorker if state.is_overdue(now, policy.timeout) => {
                state.position(id)
            }
            _ => None,
        };
        let Some(position) = takeover else {
            return Decision {
                update: Update::Abort,
                verdict: Verdict::NotNext { next },
                stale,
            };
        };
        state.pointer_index = position;
        return grant(state, now, Verdict::Takeover { skipped: next }, stale);
    }

    grant(state, now, Verdict::Grant, stale)
}

/// Take the turn for whoever the pointer names and move the pointer on.
fn grant(
    mut state: SchedulerState,
    now: DateTime<Utc>,
    verdict: Verdict,
    stale: bool,
) -> Decision {
    state.running = true;
    state.run_started_at = now;
    state.pointer_index = (state.pointer_index + 1) % state.servers.len();
    Decision {
        update: Update::Commit(state),
        verdict,
        stale,
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Why an attempt did not yield the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Standby {
    Initialized,
    Busy,
    NoServers,
    NotNext { next: Option<ServerId> },
    /// The store could not be reached; the next poll tries again.
    Unavailable(String),
}

/// Outcome of a turn attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// This worker holds the turn. Carries the committed document.
    Granted {
        state: SchedulerState,
        /// The grant also cleared a stale lock or skipped an absent worker.
        recovered: bool,
    },
    Standby(Standby),
}

impl Turn {
    pub fn is_granted(&self) -> bool {
        matches!(self, Turn::Granted { .. })
    }
}

#[derive(Clone)]
pub struct TurnCoordinator {
    store: Arc<dyn DocumentStore>,
    server_id: ServerId,
    clock: Arc<dyn Clock>,
    policy: TurnPolicy,
}

impl TurnCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        server_id: ServerId,
        clock: Arc<dyn Clock>,
        policy: TurnPolicy,
    ) -> Self {
        Self {
            store,
            server_id,
            clock,
            policy,
        }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Ask for the turn now, per the injected clock.
    pub async fn attempt_turn(&self) -> Turn {
        self.attempt_turn_at(self.clock.now()).await
    }

    /// Ask for the turn as of `now`.
    ///
    /// A store failure is logged and reported as
    /// [`Standby::Unavailable`]; the poll loop is the retry.
    pub async fn attempt_turn_at(&self, now: DateTime<Utc>) -> Turn {
        match self.try_attempt_turn(now).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(server_id = %self.server_id, error = %e, "turn attempt failed");
                metrics::turn_attempts().add(1, &[KeyValue::new("result", "error")]);
                Turn::Standby(Standby::Unavailable(e.to_string()))
            }
        }
    }

    async fn try_attempt_turn(&self, now: DateTime<Utc>) -> Result<Turn> {
        // The store may evaluate the update more than once; keep the last decision.
        let last = Mutex::new(None::<Decision>);
        let outcome = self
            .store
            .transact(&|current| {
                let decision = decide(current, &self.server_id, now, &self.policy);
                let update = decision.update.clone();
                *last.lock().unwrap_or_else(PoisonError::into_inner) = Some(decision);
                update
            })
            .await?;
        let decision = last
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| Error::Other("store returned without evaluating the update".into()))?;

        if decision.stale {
            warn!(
                server_id = %self.server_id,
                committed = outcome.is_committed(),
                "turn held past the timeout, treating the holder as crashed"
            );
            metrics::turn_recoveries().add(
                1,
                &[
                    KeyValue::new("kind", "stale"),
                    KeyValue::new("committed", outcome.is_committed().to_string()),
                ],
            );
        }

        let turn = match (outcome, decision.verdict) {
            (TxOutcome::Committed(state), Verdict::Grant) => {
                info!(
                    server_id = %self.server_id,
                    next_pointer = state.pointer_index,
                    "taking the turn"
                );
                Turn::Granted {
                    state,
                    recovered: decision.stale,
                }
            }
            (TxOutcome::Committed(_), Verdict::Initialize) => {
                info!(server_id = %self.server_id, "scheduler state initialized");
                Turn::Standby(Standby::Initialized)
            }
            (TxOutcome::Committed(state), Verdict::Takeover { skipped }) => {
                warn!(
                    server_id = %self.server_id,
                    skipped = ?skipped,
                    next_pointer = state.pointer_index,
                    "rotation overdue, taking the turn out of order"
                );
                metrics::turn_recoveries().add(1, &[KeyValue::new("kind", "takeover")]);
                Turn::Granted {
                    state,
                    recovered: true,
                }
            }
            (_, Verdict::Busy) => Turn::Standby(Standby::Busy),
            (_, Verdict::NoServers) => Turn::Standby(Standby::NoServers),
            (_, Verdict::NotNext { next }) => Turn::Standby(Standby::NotNext { next }),
            (outcome, verdict) => {
                return Err(Error::Other(format!(
                    "store outcome {outcome:?} does not match verdict {verdict:?}"
                )));
            }
        };

        if let Turn::Standby(ref reason) = turn {
            debug!(server_id = %self.server_id, ?reason, "standing by");
        }
        metrics::turn_attempts().add(
            1,
            &[KeyValue::new(
                "result",
                if turn.is_granted() { "granted" } else { "standby" },
            )],
        );
        Ok(turn)
    }

    /// Give the turn back. Unconditional, leaves the pointer alone.
    pub async fn release(&self) -> Result<()> {
        self.store.set_running(false).await
    }
}
