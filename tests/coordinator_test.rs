//! Tests for turn acquisition, rotation and crash recovery.

use chrono::{DateTime, TimeZone, Utc};
use rota::clock::ManualClock;
use rota::coordinator::{
    RecoveryMode, Standby, Turn, TurnCoordinator, TurnPolicy, Verdict, decide,
};
use rota::model::{SchedulerState, ServerId};
use rota::store::{MemoryStore, Update};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5 * 60);

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn policy(recovery: RecoveryMode) -> TurnPolicy {
    TurnPolicy {
        timeout: TIMEOUT,
        recovery,
    }
}

fn abc() -> SchedulerState {
    SchedulerState {
        running: false,
        pointer_index: 0,
        run_started_at: DateTime::<Utc>::default(),
        servers: vec!["A".into(), "B".into(), "C".into()],
    }
}

fn coordinator(store: &Arc<MemoryStore>, id: &str, clock: &ManualClock) -> TurnCoordinator {
    coordinator_with(store, id, clock, RecoveryMode::NextInLine)
}

fn coordinator_with(
    store: &Arc<MemoryStore>,
    id: &str,
    clock: &ManualClock,
    recovery: RecoveryMode,
) -> TurnCoordinator {
    TurnCoordinator::new(
        store.clone(),
        ServerId::new(id),
        Arc::new(clock.clone()),
        policy(recovery),
    )
}

// ---------------------------------------------------------------------------
// Granting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_in_rotation_takes_the_turn_and_others_see_it_busy() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());

    let turn = coordinator(&store, "A", &clock).attempt_turn().await;
    match turn {
        Turn::Granted { state, recovered } => {
            assert!(state.running);
            assert_eq!(state.pointer_index, 1);
            assert_eq!(state.run_started_at, t0());
            assert!(!recovered);
        }
        other => panic!("expected Granted, got {other:?}"),
    }

    for id in ["B", "C"] {
        let turn = coordinator(&store, id, &clock).attempt_turn().await;
        assert_eq!(turn, Turn::Standby(Standby::Busy));
    }

    let state = store.snapshot().unwrap();
    assert!(state.running);
    assert_eq!(state.pointer_index, 1);
}

#[tokio::test]
async fn worker_not_at_pointer_commits_nothing() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());

    let turn = coordinator(&store, "B", &clock).attempt_turn().await;
    assert_eq!(
        turn,
        Turn::Standby(Standby::NotNext {
            next: Some("A".into())
        })
    );
    assert_eq!(store.commits(), 0);
    assert_eq!(store.snapshot().unwrap(), abc());
}

#[tokio::test]
async fn missing_state_is_initialized_without_granting() {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(t0());
    let a = coordinator(&store, "A", &clock);

    assert_eq!(a.attempt_turn().await, Turn::Standby(Standby::Initialized));
    let state = store.snapshot().unwrap();
    assert_eq!(state.servers, vec![ServerId::new("A")]);
    assert!(!state.running);
    assert_eq!(state.pointer_index, 0);

    // The next poll grants it; a single-member rotation wraps to itself.
    match a.attempt_turn().await {
        Turn::Granted { state, .. } => assert_eq!(state.pointer_index, 0),
        other => panic!("expected Granted, got {other:?}"),
    }
}

#[tokio::test]
async fn release_clears_running_and_keeps_the_pointer() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());
    let a = coordinator(&store, "A", &clock);

    assert!(a.attempt_turn().await.is_granted());
    a.release().await.unwrap();

    let state = store.snapshot().unwrap();
    assert!(!state.running);
    assert_eq!(state.pointer_index, 1);

    // A cannot go twice in a row.
    assert!(!a.attempt_turn().await.is_granted());
    assert!(coordinator(&store, "B", &clock).attempt_turn().await.is_granted());
}

#[tokio::test]
async fn turns_follow_registration_order_and_wrap() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());
    let workers: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|id| coordinator(&store, id, &clock))
        .collect();

    // Each worker polls once per round; a release lets the next in line in
    // during the same round.
    let mut order = Vec::new();
    for _ in 0..3 {
        clock.advance(Duration::from_secs(15));
        for worker in &workers {
            if worker.attempt_turn().await.is_granted() {
                order.push(worker.server_id().to_string());
                worker.release().await.unwrap();
            }
        }
    }

    assert_eq!(order, vec!["A", "B", "C", "A", "B", "C", "A", "B", "C"]);
}

#[tokio::test]
async fn pointer_past_the_end_is_repaired() {
    let mut state = abc();
    state.servers.truncate(2);
    state.pointer_index = 5;
    let store = Arc::new(MemoryStore::with_state(state));
    let clock = ManualClock::new(t0());

    match coordinator(&store, "A", &clock).attempt_turn().await {
        Turn::Granted { state, .. } => assert_eq!(state.pointer_index, 1),
        other => panic!("expected Granted, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_registry_grants_nobody() {
    let mut state = abc();
    state.servers.clear();
    let store = Arc::new(MemoryStore::with_state(state));
    let clock = ManualClock::new(t0());

    let turn = coordinator(&store, "A", &clock).attempt_turn().await;
    assert_eq!(turn, Turn::Standby(Standby::NoServers));
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn unreachable_store_is_a_standby() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    store.fail_transactions(true);
    let clock = ManualClock::new(t0());

    let turn = coordinator(&store, "A", &clock).attempt_turn().await;
    assert!(matches!(turn, Turn::Standby(Standby::Unavailable(_))));

    // Next poll recovers on its own.
    store.fail_transactions(false);
    assert!(coordinator(&store, "A", &clock).attempt_turn().await.is_granted());
}

#[tokio::test]
async fn concurrent_attempts_grant_exactly_one() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());
    let a = coordinator(&store, "A", &clock);
    let b = coordinator(&store, "B", &clock);
    let c = coordinator(&store, "C", &clock);

    let (ta, tb, tc) = tokio::join!(a.attempt_turn(), b.attempt_turn(), c.attempt_turn());
    let granted = [&ta, &tb, &tc].iter().filter(|t| t.is_granted()).count();
    assert_eq!(granted, 1);
    assert!(ta.is_granted());
    assert_eq!(store.commits(), 1);
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lock_within_timeout_is_not_stale() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());

    assert!(coordinator(&store, "A", &clock).attempt_turn().await.is_granted());
    clock.advance(TIMEOUT);

    let turn = coordinator(&store, "B", &clock).attempt_turn().await;
    assert_eq!(turn, Turn::Standby(Standby::Busy));
}

#[tokio::test]
async fn only_next_in_line_recovers_a_stale_lock() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());

    // A takes the turn and never releases.
    assert!(coordinator(&store, "A", &clock).attempt_turn().await.is_granted());
    let held = store.snapshot().unwrap();
    clock.advance(Duration::from_secs(6 * 60));

    // C sees the stale lock but is not next, so its reset is discarded.
    let turn = coordinator(&store, "C", &clock).attempt_turn().await;
    assert_eq!(
        turn,
        Turn::Standby(Standby::NotNext {
            next: Some("B".into())
        })
    );
    assert_eq!(store.snapshot().unwrap(), held);

    // B resets and takes the turn in the same step.
    match coordinator(&store, "B", &clock).attempt_turn().await {
        Turn::Granted { state, recovered } => {
            assert!(recovered);
            assert!(state.running);
            assert_eq!(state.pointer_index, 2);
            assert_eq!(state.run_started_at, t0() + chrono::Duration::minutes(6));
        }
        other => panic!("expected Granted, got {other:?}"),
    }
}

#[tokio::test]
async fn any_worker_mode_takes_over_a_stale_lock_and_skips_the_absent_worker() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());

    assert!(
        coordinator_with(&store, "A", &clock, RecoveryMode::AnyWorker)
            .attempt_turn()
            .await
            .is_granted()
    );
    clock.advance(Duration::from_secs(6 * 60));

    // B is next but gone; C takes the turn and the pointer resumes after C.
    match coordinator_with(&store, "C", &clock, RecoveryMode::AnyWorker)
        .attempt_turn()
        .await
    {
        Turn::Granted { state, recovered } => {
            assert!(recovered);
            assert!(state.running);
            assert_eq!(state.pointer_index, 0);
            assert_eq!(state.run_started_at, t0() + chrono::Duration::minutes(6));
        }
        other => panic!("expected Granted, got {other:?}"),
    }
}

#[tokio::test]
async fn any_worker_mode_keeps_the_rotation_alive_with_a_worker_down_for_good() {
    let store = Arc::new(MemoryStore::with_state(abc()));
    let clock = ManualClock::new(t0());
    let a = coordinator_with(&store, "A", &clock, RecoveryMode::AnyWorker);
    let c = coordinator_with(&store, "C", &clock, RecoveryMode::AnyWorker);

    // A takes the turn and crashes; B never polls again.
    assert!(a.attempt_turn().await.is_granted());

    let mut grants = Vec::new();
    for _ in 0..(50 * 60 / 15) {
        clock.advance(Duration::from_secs(15));
        for worker in [&c, &a] {
            if worker.attempt_turn().await.is_granted() {
                grants.push(worker.server_id().to_string());
                worker.release().await.unwrap();
            }
        }
    }

    let count = |id: &str| grants.iter().filter(|g| *g == id).count();
    assert!(count("A") >= 5, "A starved: {grants:?}");
    assert!(count("C") >= 5, "C starved: {grants:?}");
    assert!(!store.snapshot().unwrap().running);
}

#[tokio::test]
async fn any_worker_mode_leaves_a_live_rotation_alone() {
    let mut state = abc();
    state.run_started_at = t0();
    state.pointer_index = 1;
    let store = Arc::new(MemoryStore::with_state(state.clone()));
    let clock = ManualClock::new(t0() + chrono::Duration::minutes(4));

    let turn = coordinator_with(&store, "C", &clock, RecoveryMode::AnyWorker)
        .attempt_turn()
        .await;
    assert_eq!(
        turn,
        Turn::Standby(Standby::NotNext {
            next: Some("B".into())
        })
    );
    assert_eq!(store.snapshot().unwrap(), state);
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

#[test]
fn decide_discards_the_reset_when_aborting() {
    let mut state = abc();
    state.running = true;
    state.run_started_at = t0();
    state.pointer_index = 1;

    let now = t0() + chrono::Duration::minutes(10);
    let decision = decide(
        Some(state),
        &"C".into(),
        now,
        &policy(RecoveryMode::NextInLine),
    );
    assert!(decision.stale);
    assert_eq!(decision.update, Update::Abort);
    assert_eq!(
        decision.verdict,
        Verdict::NotNext {
            next: Some("B".into())
        }
    );
}

#[test]
fn decide_grant_advances_the_pointer_modulo_length() {
    let mut state = abc();
    state.pointer_index = 2;

    let decision = decide(
        Some(state),
        &"C".into(),
        t0(),
        &policy(RecoveryMode::NextInLine),
    );
    assert_eq!(decision.verdict, Verdict::Grant);
    match decision.update {
        Update::Commit(next) => {
            assert!(next.running);
            assert_eq!(next.pointer_index, 0);
            assert_eq!(next.run_started_at, t0());
        }
        Update::Abort => panic!("expected a commit"),
    }
}

#[test]
fn recovery_mode_parses_from_config_strings() {
    assert_eq!(
        "next-in-line".parse::<RecoveryMode>().unwrap(),
        RecoveryMode::NextInLine
    );
    assert_eq!(
        "ANY-WORKER".parse::<RecoveryMode>().unwrap(),
        RecoveryMode::AnyWorker
    );
    assert!("whoever".parse::<RecoveryMode>().is_err());
}

#[test]
fn decide_takeover_skips_an_overdue_idle_pointer() {
    let mut state = abc();
    state.run_started_at = t0();
    state.pointer_index = 1;

    let now = t0() + chrono::Duration::minutes(6);
    let decision = decide(Some(state), &"A".into(), now, &policy(RecoveryMode::AnyWorker));
    assert!(!decision.stale);
    assert_eq!(
        decision.verdict,
        Verdict::Takeover {
            skipped: Some("B".into())
        }
    );
    match decision.update {
        Update::Commit(next) => {
            assert!(next.running);
            assert_eq!(next.pointer_index, 1);
            assert_eq!(next.run_started_at, now);
        }
        Update::Abort => panic!("expected a commit"),
    }
}

#[test]
fn decide_never_lets_an_unregistered_worker_take_over() {
    let mut state = abc();
    state.running = true;
    state.run_started_at = t0();

    let now = t0() + chrono::Duration::minutes(10);
    let decision = decide(Some(state), &"Z".into(), now, &policy(RecoveryMode::AnyWorker));
    assert!(decision.stale);
    assert_eq!(decision.update, Update::Abort);
}
