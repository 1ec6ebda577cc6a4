//! Lock state transitions and administrative overrides

mod support;

use chrono::Duration;
use uuid::Uuid;

use guard::error::GuardError;
use guard::models::{SecurityEventDetails, SecurityEventType};
use support::*;

#[tokio::test]
async fn reading_lock_state_never_writes() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let ctx = ctx(LAPTOP, noon());

    assert!(!h.service.is_locked(&ctx, user_id).await.unwrap());
    assert!(!h.service.is_locked(&ctx, user_id).await.unwrap());
    assert_eq!(h.accounts.write_count(), 0);
}

#[tokio::test]
async fn expired_lock_reads_as_unlocked_without_a_write() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    h.service
        .lock_account(&ctx(LAPTOP, now), user_id, "manual review", 1)
        .await
        .unwrap();
    assert_eq!(h.accounts.write_count(), 1);
    assert!(h.service.is_locked(&ctx(LAPTOP, now), user_id).await.unwrap());

    let after_expiry = ctx(LAPTOP, now + Duration::hours(2));
    assert!(!h.service.is_locked(&after_expiry, user_id).await.unwrap());
    assert!(!h.service.security_status(&after_expiry, user_id).await.locked);
    assert_eq!(h.accounts.write_count(), 1);
}

#[tokio::test]
async fn unlock_then_is_locked_is_false() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let admin_id = Uuid::new_v4();
    let admin = ctx(LAPTOP, noon()).with_actor(admin_id);

    h.service
        .lock_account(&admin, user_id, "suspected takeover", 12)
        .await
        .unwrap();
    h.service.unlock_account(&admin, user_id).await.unwrap();

    assert!(!h.service.is_locked(&admin, user_id).await.unwrap());

    let events = h.events(user_id).await;
    let unlocked = events
        .iter()
        .find(|e| e.event_type() == SecurityEventType::AccountUnlocked)
        .expect("unlock event");
    match &unlocked.details {
        SecurityEventDetails::AccountUnlocked {
            previous_reason,
            actor,
            ..
        } => {
            assert_eq!(previous_reason.as_deref(), Some("suspected takeover"));
            assert_eq!(*actor, Some(admin_id));
        }
        other => panic!("unexpected details {:?}", other),
    }
}

#[tokio::test]
async fn admin_lock_is_clamped_to_the_maximum() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    let lock = h
        .service
        .lock_account(&ctx(LAPTOP, now), user_id, "fraud", 100_000)
        .await
        .unwrap();

    assert_eq!(lock.until, now + Duration::hours(720));
}

#[tokio::test]
async fn admin_lock_rejects_bad_arguments() {
    let h = harness();
    let ctx = ctx(LAPTOP, noon());
    let user_id = Uuid::new_v4();

    for (reason, hours) in [("", 4), ("   ", 4), ("fraud", 0)] {
        assert!(matches!(
            h.service.lock_account(&ctx, user_id, reason, hours).await,
            Err(GuardError::InvalidInput(_))
        ));
    }
    assert!(matches!(
        h.service.lock_account(&ctx, Uuid::nil(), "fraud", 4).await,
        Err(GuardError::InvalidInput(_))
    ));
    assert_eq!(h.accounts.write_count(), 0);
}

#[tokio::test]
async fn admin_lock_ends_every_session() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    h.login(user_id, "token", LAPTOP, now).await.unwrap();
    assert_eq!(h.active_sessions(user_id, now).await.len(), 1);

    h.service
        .lock_account(&ctx(PHONE, now), user_id, "policy breach", 24)
        .await
        .unwrap();

    assert!(h.active_sessions(user_id, now).await.is_empty());
    assert!(
        h.events(user_id)
            .await
            .iter()
            .any(|e| e.event_type() == SecurityEventType::AccountLocked)
    );
}

#[tokio::test]
async fn evaluating_an_already_locked_account_keeps_the_lock() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    for (token, device) in [("a", LAPTOP), ("b", PHONE), ("c", TABLET)] {
        h.login(user_id, token, device, now).await.unwrap();
    }
    let first_lock = match h.login(user_id, "d", DESKTOP, now).await {
        Err(GuardError::AccountLocked { lock, .. }) => lock,
        other => panic!("expected lock, got {:?}", other.map(|o| o.enforcement)),
    };

    let later = ctx(("192.0.2.99", "curl/8.5"), now + Duration::minutes(5));
    let outcome = h
        .service
        .enforce_single_session(&later, user_id, "e")
        .await
        .unwrap();

    assert_eq!(outcome.lock, Some(first_lock));
    let limit_events = h
        .events(user_id)
        .await
        .into_iter()
        .filter(|e| e.event_type() == SecurityEventType::DeviceLimitExceeded)
        .count();
    assert_eq!(limit_events, 1);
}
