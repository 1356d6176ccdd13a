//! End to end: a worker crashes holding the turn and the rotation recovers.
//!
//! Three registered servers, a five minute timeout and a 15 second poll.
//! A takes the turn and dies without releasing. C keeps polling the whole
//! time; B is offline until minute seven. Nobody but B can clear the lock.

use chrono::{TimeZone, Utc};
use rota::clock::{Clock, ManualClock};
use rota::coordinator::{Standby, Turn, TurnCoordinator, TurnPolicy};
use rota::model::ServerId;
use rota::registry::ServerRegistry;
use rota::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_secs(15);

#[tokio::test]
async fn crashed_holder_is_recovered_by_next_in_line_only() {
    let store = Arc::new(MemoryStore::new());
    let registry = ServerRegistry::new(store.clone());
    for id in ["A", "B", "C"] {
        registry.register(&id.into()).await.unwrap();
    }

    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap());
    let worker = |id: &str| {
        TurnCoordinator::new(
            store.clone(),
            ServerId::new(id),
            Arc::new(clock.clone()),
            TurnPolicy {
                timeout: Duration::from_secs(5 * 60),
                ..TurnPolicy::default()
            },
        )
    };
    let (a, b, c) = (worker("A"), worker("B"), worker("C"));

    assert!(a.attempt_turn().await.is_granted());
    let started = clock.now();

    // A is gone. For seven minutes only C polls; the lock must stay visible.
    let mut elapsed = Duration::ZERO;
    while elapsed < Duration::from_secs(7 * 60) {
        clock.advance(POLL);
        elapsed += POLL;

        let turn = c.attempt_turn().await;
        assert!(
            matches!(turn, Turn::Standby(Standby::Busy | Standby::NotNext { .. })),
            "C got {turn:?} after {elapsed:?}"
        );
        let state = store.snapshot().unwrap();
        assert!(state.running, "lock cleared without B after {elapsed:?}");
        assert_eq!(state.run_started_at, started);
        assert_eq!(state.pointer_index, 1);
    }

    // B comes back and recovers in the same step it takes the turn.
    match b.attempt_turn().await {
        Turn::Granted { state, recovered } => {
            assert!(recovered);
            assert_eq!(state.pointer_index, 2);
        }
        other => panic!("expected B to recover, got {other:?}"),
    }

    // From here the rotation continues normally.
    b.release().await.unwrap();
    assert!(c.attempt_turn().await.is_granted());
}
