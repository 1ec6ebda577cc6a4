//! Login-time enforcement through the service facade

mod support;

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use guard::error::GuardError;
use guard::lockout::LockoutPolicy;
use guard::models::{SecurityEventDetails, SecurityEventType};
use guard::repositories::{MemoryAccountStore, MemoryDeviceLedger, MemorySessionStore, Stores};
use support::*;

#[tokio::test]
async fn second_device_replaces_the_first_session() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    let first = h.login(user_id, "token-a", LAPTOP, now).await.unwrap();
    assert_eq!(first.enforcement.terminated_count, 0);

    let second = h
        .login(user_id, "token-b", PHONE, now + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(second.enforcement.terminated_count, 1);
    assert_eq!(second.enforcement.devices_today, 2);

    let status = h
        .service
        .security_status(&ctx(PHONE, now + Duration::minutes(1)), user_id)
        .await;
    assert_eq!(status.devices_used_today, 2);
    assert!(!status.locked);
    assert!(!status.degraded);

    let active = h.active_sessions(user_id, now + Duration::minutes(1)).await;
    assert_eq!(active.len(), 1);
    assert!(active[0].matches_token("token-b"));
}

#[tokio::test]
async fn fourth_device_in_a_day_locks_the_account() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    for (i, (token, device)) in [("token-a", LAPTOP), ("token-b", PHONE), ("token-c", TABLET)]
        .into_iter()
        .enumerate()
    {
        h.login(user_id, token, device, now + Duration::minutes(i as i64))
            .await
            .unwrap();
    }

    let later = now + Duration::minutes(10);
    let refused = h.login(user_id, "token-d", DESKTOP, later).await;
    let lock = match refused {
        Err(GuardError::AccountLocked { lock, .. }) => lock,
        other => panic!("expected a locked login, got {:?}", other.map(|o| o.enforcement)),
    };
    assert!(lock.until > later);
    assert!(!lock.reason.is_empty());

    let status = h.service.security_status(&ctx(DESKTOP, later), user_id).await;
    assert!(status.locked);
    assert_eq!(status.devices_used_today, 4);
    assert_eq!(status.max_devices_allowed, 3);
    assert!(status.lock_until.is_some_and(|until| until > later));

    assert!(h.active_sessions(user_id, later).await.is_empty());

    let limit_events = h
        .events(user_id)
        .await
        .into_iter()
        .filter(|e| e.event_type() == SecurityEventType::DeviceLimitExceeded)
        .count();
    assert_eq!(limit_events, 1);
}

#[tokio::test]
async fn exactly_the_allowance_does_not_lock() {
    let h = harness_with_policy(LockoutPolicy {
        max_devices_per_day: 2,
        ..LockoutPolicy::default()
    });
    let user_id = Uuid::new_v4();
    let now = noon();

    h.login(user_id, "a", LAPTOP, now).await.unwrap();
    let at_limit = h.login(user_id, "b", PHONE, now).await.unwrap();
    assert!(!at_limit.enforcement.is_locked());
    assert!(!h.service.is_locked(&ctx(PHONE, now), user_id).await.unwrap());

    assert!(matches!(
        h.login(user_id, "c", TABLET, now).await,
        Err(GuardError::AccountLocked { .. })
    ));
}

#[tokio::test]
async fn repeat_logins_from_one_device_count_once() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    for i in 0..6 {
        let outcome = h
            .login(user_id, &format!("token-{}", i), LAPTOP, now + Duration::minutes(i))
            .await
            .unwrap();
        assert_eq!(outcome.enforcement.devices_today, 1);
    }

    assert_eq!(h.active_sessions(user_id, now + Duration::minutes(6)).await.len(), 1);
}

#[tokio::test]
async fn devices_from_yesterday_do_not_count() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let yesterday = noon() - Duration::days(1);

    for (token, device) in [("a", LAPTOP), ("b", PHONE), ("c", TABLET)] {
        h.login(user_id, token, device, yesterday).await.unwrap();
    }

    let today = h.login(user_id, "d", DESKTOP, noon()).await.unwrap();
    assert_eq!(today.enforcement.devices_today, 1);
    assert!(!today.enforcement.is_locked());
}

#[tokio::test]
async fn locked_account_is_refused_before_any_write() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();
    let admin = ctx(LAPTOP, now);

    h.service
        .lock_account(&admin, user_id, "chargeback investigation", 4)
        .await
        .unwrap();

    assert!(matches!(
        h.login(user_id, "token", PHONE, now + Duration::minutes(1)).await,
        Err(GuardError::AccountLocked { .. })
    ));
    assert!(h.active_sessions(user_id, now).await.is_empty());
    assert!(
        h.service
            .device_history(user_id, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn login_event_records_the_fingerprint() {
    let h = harness();
    let user_id = Uuid::new_v4();

    h.login(user_id, "token", LAPTOP, noon()).await.unwrap();

    let events = h.events(user_id).await;
    let login = events
        .iter()
        .find(|e| e.event_type() == SecurityEventType::Login)
        .expect("login event");
    match &login.details {
        SecurityEventDetails::Login { fingerprint, location } => {
            assert_eq!(fingerprint, &guard::fingerprint::fingerprint(LAPTOP.1, LAPTOP.0));
            assert!(location.is_none());
        }
        other => panic!("unexpected details {:?}", other),
    }
}

#[tokio::test]
async fn bookkeeping_failures_do_not_fail_enforcement() {
    let service = service_over(Stores {
        sessions: Arc::new(OfflineSessionStore),
        ledger: Arc::new(FlakyLedger::refusing()),
        events: Arc::new(OfflineEventStore),
        accounts: Arc::new(MemoryAccountStore::new()),
    });

    let outcome = service
        .enforce_single_session(&ctx(LAPTOP, noon()), Uuid::new_v4(), "token")
        .await
        .unwrap();

    assert_eq!(outcome.terminated_count, 0);
    assert!(!outcome.is_locked());
}

#[tokio::test]
async fn unrecorded_login_still_counts_toward_the_limit() {
    let ledger = Arc::new(FlakyLedger::default());
    let service = service_over(Stores {
        sessions: Arc::new(MemorySessionStore::new()),
        ledger: ledger.clone(),
        events: Arc::new(guard::repositories::MemorySecurityEventStore::new()),
        accounts: Arc::new(MemoryAccountStore::new()),
    });
    let user_id = Uuid::new_v4();
    let now = noon();

    for (token, device) in [("a", LAPTOP), ("b", PHONE), ("c", TABLET)] {
        let ctx = ctx(device, now);
        service
            .register_login(&ctx, new_session(user_id, token, &ctx))
            .await
            .unwrap();
    }

    ledger.refuse_writes(true);

    let repeat = ctx(LAPTOP, now + Duration::minutes(1));
    let outcome = service
        .register_login(&repeat, new_session(user_id, "a2", &repeat))
        .await
        .unwrap();
    assert_eq!(outcome.enforcement.devices_today, 3);
    assert!(!outcome.enforcement.is_locked());

    let fourth = ctx(DESKTOP, now + Duration::minutes(2));
    assert!(matches!(
        service
            .register_login(&fourth, new_session(user_id, "d", &fourth))
            .await,
        Err(GuardError::AccountLocked { .. })
    ));
    assert!(service.is_locked(&fourth, user_id).await.unwrap());
}

#[tokio::test]
async fn unreadable_device_count_fails_closed() {
    let service = service_over(Stores {
        sessions: Arc::new(MemorySessionStore::new()),
        ledger: Arc::new(OfflineLedger),
        events: Arc::new(guard::repositories::MemorySecurityEventStore::new()),
        accounts: Arc::new(MemoryAccountStore::new()),
    });

    let result = service
        .enforce_single_session(&ctx(LAPTOP, noon()), Uuid::new_v4(), "token")
        .await;

    assert!(matches!(result, Err(GuardError::LockEvaluation(_))));
}

#[tokio::test]
async fn unreadable_lock_state_refuses_login() {
    let service = service_over(Stores {
        sessions: Arc::new(MemorySessionStore::new()),
        ledger: Arc::new(MemoryDeviceLedger::new()),
        events: Arc::new(guard::repositories::MemorySecurityEventStore::new()),
        accounts: Arc::new(OfflineAccountStore),
    });
    let ctx = ctx(LAPTOP, noon());

    let result = service
        .register_login(&ctx, new_session(Uuid::new_v4(), "token", &ctx))
        .await;

    assert!(matches!(result, Err(GuardError::LockEvaluation(_))));
}

#[tokio::test]
async fn invalid_login_payloads_are_rejected() {
    let h = harness();
    let ctx = ctx(LAPTOP, noon());

    let nil_user = new_session(Uuid::nil(), "token", &ctx);
    assert!(matches!(
        h.service.register_login(&ctx, nil_user).await,
        Err(GuardError::InvalidInput(_))
    ));

    let mut expired = new_session(Uuid::new_v4(), "token", &ctx);
    expired.expires_at = ctx.now;
    assert!(matches!(
        h.service.register_login(&ctx, expired).await,
        Err(GuardError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn owner_can_end_a_session_but_nobody_else_can() {
    let h = harness();
    let owner = Uuid::new_v4();
    let now = noon();

    let login = h.login(owner, "token", LAPTOP, now).await.unwrap();
    let session_id = login.session.id;

    let stranger = ctx(PHONE, now);
    assert!(matches!(
        h.service
            .terminate_session(&stranger, Uuid::new_v4(), session_id)
            .await,
        Err(GuardError::NotFound)
    ));

    h.service
        .terminate_session(&ctx(LAPTOP, now), owner, session_id)
        .await
        .unwrap();
    assert!(h.active_sessions(owner, now).await.is_empty());
    assert!(matches!(
        h.service
            .terminate_session(&ctx(LAPTOP, now), owner, session_id)
            .await,
        Err(GuardError::NotFound)
    ));
}

#[tokio::test]
async fn logout_removes_the_current_session() {
    let h = harness();
    let user_id = Uuid::new_v4();
    let now = noon();

    h.login(user_id, "token", LAPTOP, now).await.unwrap();
    h.service
        .logout(&ctx(LAPTOP, now), user_id, "token")
        .await
        .unwrap();

    assert!(h.active_sessions(user_id, now).await.is_empty());
    assert!(
        h.events(user_id)
            .await
            .iter()
            .any(|e| e.event_type() == SecurityEventType::Logout)
    );
    assert!(matches!(
        h.service.logout(&ctx(LAPTOP, now), user_id, "token").await,
        Err(GuardError::NotFound)
    ));
}
