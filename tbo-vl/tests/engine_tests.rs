//! Entitlement engine integration tests
//!
//! Run against a real SQLite file:
//! - Access decisions for free, preview and premium content
//! - Idempotent payment intake, renewal and replay after renewal
//! - Monotone progress, completion once, preview boundary
//! - Concurrent progress reports and duplicate payment deliveries
//! - Revocation, extension and the learner library
//! - Writers in separate engine instances sharing one database

mod helpers;

use chrono::{Duration, Utc};
use tbo_common::db::AccessType;
use tbo_common::events::TboEvent;
use tbo_common::time::storage_precision;
use tokio::sync::broadcast::Receiver;
use uuid::Uuid;

use helpers::{entitlement_count, payment, peer_engine, setup};
use tbo_vl::entitlement::{AccessReason, GrantOutcome, GrantState, ProgressReport, ProgressState};
use tbo_vl::Error;

fn at(position_seconds: f64) -> ProgressReport {
    ProgressReport::at(position_seconds)
}

fn drain(rx: &mut Receiver<TboEvent>) -> Vec<TboEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Access resolution
// =============================================================================

#[tokio::test]
async fn test_free_content_without_any_record_is_unbounded() {
    let ctx = setup().await;

    let decision = ctx
        .engine
        .check_access(Uuid::new_v4(), ctx.free.guid, Utc::now())
        .await
        .unwrap();

    assert!(decision.allowed);
    assert_eq!(decision.max_playback_seconds, None);
}

#[tokio::test]
async fn test_unknown_content_is_not_found() {
    let ctx = setup().await;

    let result = ctx.engine.check_access(Uuid::new_v4(), Uuid::new_v4(), Utc::now()).await;

    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_premium_grant_unlocks_preview_content() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.preview, "pay_preview"), Utc::now())
        .await
        .unwrap();

    let decision = ctx.engine.check_access(user, ctx.preview.guid, Utc::now()).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.max_playback_seconds, None);
    assert_eq!(decision.reason, AccessReason::Entitled);
}

#[tokio::test]
async fn test_expired_grant_denies_premium_but_keeps_preview_allowance() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    for (content, payment_ref) in [(&ctx.premium, "pay_a"), (&ctx.preview, "pay_b")] {
        let mut confirmation = payment(user, content, payment_ref);
        confirmation.expires_at = Some(now + Duration::hours(1));
        ctx.engine.apply_payment_confirmation(confirmation, now).await.unwrap();
    }

    let later = now + Duration::hours(2);

    let premium = ctx.engine.check_access(user, ctx.premium.guid, later).await.unwrap();
    assert!(!premium.allowed);
    assert_eq!(premium.reason, AccessReason::EntitlementExpired);

    let preview = ctx.engine.check_access(user, ctx.preview.guid, later).await.unwrap();
    assert!(preview.allowed);
    assert_eq!(preview.max_playback_seconds, Some(120.0));

    // Still valid before the window closes
    assert!(ctx.engine.check_access(user, ctx.premium.guid, now).await.unwrap().allowed);
}

// =============================================================================
// Payment intake
// =============================================================================

#[tokio::test]
async fn test_premium_payment_creates_record_and_replay_is_noop() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let mut rx = ctx.engine.event_bus().subscribe();

    let first = ctx
        .engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), Utc::now())
        .await
        .unwrap();
    let GrantOutcome::Created(created) = first else {
        panic!("expected Created, got {:?}", first);
    };
    assert_eq!(created.access_type, AccessType::Premium);
    assert!(created.active);

    let replay = ctx
        .engine
        .apply_payment_confirmation(
            payment(user, &ctx.premium, "pay_1"),
            Utc::now() + Duration::minutes(5),
        )
        .await
        .unwrap();

    assert_eq!(replay, GrantOutcome::Duplicate(created.clone()));
    assert_eq!(entitlement_count(&ctx.pool, user, ctx.premium.guid).await, 1);

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], TboEvent::EntitlementGranted { .. }));
}

#[tokio::test]
async fn test_duplicate_with_different_access_type_keeps_first_grant() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.preview, "pay_1"), Utc::now())
        .await
        .unwrap();

    let mut conflicting = payment(user, &ctx.preview, "pay_1");
    conflicting.access_type = AccessType::Preview;
    let outcome = ctx
        .engine
        .apply_payment_confirmation(conflicting, Utc::now())
        .await
        .unwrap();

    assert!(matches!(outcome, GrantOutcome::Duplicate(_)));
    assert_eq!(outcome.record().access_type, AccessType::Premium);
}

#[tokio::test]
async fn test_renewal_resumes_progress_and_completion() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let t1 = storage_precision(Utc::now());

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), t1)
        .await
        .unwrap();
    ctx.engine
        .report_progress(user, ctx.premium.guid, at(3400.0), t1)
        .await
        .unwrap();
    ctx.engine.revoke(user, ctx.premium.guid, t1).await.unwrap();

    let t2 = t1 + Duration::days(1);
    let mut renewal = payment(user, &ctx.premium, "pay_2");
    renewal.expires_at = Some(t2 + Duration::days(30));
    let outcome = ctx.engine.apply_payment_confirmation(renewal, t2).await.unwrap();

    let GrantOutcome::Renewed {
        record,
        previous_payment_ref,
    } = outcome
    else {
        panic!("expected Renewed");
    };
    assert_eq!(previous_payment_ref.as_deref(), Some("pay_1"));
    assert!(record.active);
    assert_eq!(record.granted_at, t2);
    assert_eq!(record.progress.current_position_seconds, 3400.0);
    assert_eq!(record.completed_at, Some(t1));
    assert_eq!(entitlement_count(&ctx.pool, user, ctx.premium.guid).await, 1);
}

#[tokio::test]
async fn test_old_payment_replayed_after_renewal_is_ignored() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), Utc::now())
        .await
        .unwrap();
    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_2"), Utc::now())
        .await
        .unwrap();

    let replay = ctx
        .engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), Utc::now())
        .await
        .unwrap();

    assert!(matches!(replay, GrantOutcome::Duplicate(_)));
    assert_eq!(replay.record().payment_ref.as_deref(), Some("pay_2"));
}

#[tokio::test]
async fn test_payment_validation() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let mut unknown = payment(user, &ctx.premium, "pay_x");
    unknown.content_id = Uuid::new_v4();
    assert!(matches!(
        ctx.engine.apply_payment_confirmation(unknown, now).await,
        Err(Error::NotFound(_))
    ));

    assert!(matches!(
        ctx.engine
            .apply_payment_confirmation(payment(user, &ctx.premium, ""), now)
            .await,
        Err(Error::InvalidState(_))
    ));

    let mut stale = payment(user, &ctx.premium, "pay_y");
    stale.expires_at = Some(now - Duration::seconds(1));
    assert!(matches!(
        ctx.engine.apply_payment_confirmation(stale, now).await,
        Err(Error::InvalidState(_))
    ));

    // A reference belongs to exactly one (user, content)
    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_z"), now)
        .await
        .unwrap();
    assert!(matches!(
        ctx.engine
            .apply_payment_confirmation(payment(Uuid::new_v4(), &ctx.premium, "pay_z"), now)
            .await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_concurrent_duplicate_deliveries_grant_once() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let mut rx = ctx.engine.event_bus().subscribe();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = ctx.engine.clone();
        let confirmation = payment(user, &ctx.premium, "pay_dup");
        handles.push(tokio::spawn(async move {
            engine.apply_payment_confirmation(confirmation, Utc::now()).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        if let GrantOutcome::Created(_) = handle.await.unwrap().unwrap() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(entitlement_count(&ctx.pool, user, ctx.premium.guid).await, 1);
    let receipts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payment_receipts WHERE payment_ref = 'pay_dup'")
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(receipts, 1);

    let granted = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TboEvent::EntitlementGranted { .. }))
        .count();
    assert_eq!(granted, 1);
}

// =============================================================================
// Progress tracking
// =============================================================================

#[tokio::test]
async fn test_progress_is_monotone_in_any_order() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let positions = [120.0, 30.0, 480.0, 240.0, 479.0, 0.0];

    for position in positions {
        ctx.engine
            .report_progress(user, ctx.free.guid, at(position), Utc::now())
            .await
            .unwrap();
    }

    let record = ctx.engine.get_entitlement(user, ctx.free.guid).await.unwrap();
    assert_eq!(record.progress.current_position_seconds, 480.0);
    assert!((record.progress.percentage - 80.0).abs() < 1e-9);
    assert_eq!(record.watch_session_count, positions.len() as i64);
    assert_eq!(record.access_type, AccessType::Free);
    assert_eq!(record.payment_ref, None);
}

#[tokio::test]
async fn test_concurrent_progress_reports_converge_on_max() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = ctx.engine.clone();
        let content_id = ctx.free.guid;
        handles.push(tokio::spawn(async move {
            engine
                .report_progress(user, content_id, at((i * 25) as f64), Utc::now())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let record = ctx.engine.get_entitlement(user, ctx.free.guid).await.unwrap();
    assert_eq!(record.progress.current_position_seconds, 475.0);
    assert_eq!(record.watch_session_count, 20);
    assert_eq!(entitlement_count(&ctx.pool, user, ctx.free.guid).await, 1);
}

#[tokio::test]
async fn test_completion_is_recorded_once() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let mut rx = ctx.engine.event_bus().subscribe();
    let t1 = storage_precision(Utc::now());

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), t1)
        .await
        .unwrap();

    let update = ctx
        .engine
        .report_progress(user, ctx.premium.guid, at(3400.0), t1)
        .await
        .unwrap();
    assert!(update.newly_completed);
    assert!((update.record.progress.percentage - 94.44).abs() < 0.01);
    assert_eq!(update.record.completed_at, Some(t1));

    let t2 = t1 + Duration::minutes(10);
    let later = ctx
        .engine
        .report_progress(user, ctx.premium.guid, at(3600.0), t2)
        .await
        .unwrap();
    assert!(!later.newly_completed);
    assert_eq!(later.record.completed_at, Some(t1));
    assert_eq!(later.record.progress.last_watched_at, Some(t2));

    let completions = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TboEvent::ContentCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn test_catalog_duration_correction_keeps_completion() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    ctx.engine
        .report_progress(user, ctx.free.guid, at(590.0), Utc::now())
        .await
        .unwrap();

    let mut longer = ctx.free.clone();
    longer.total_duration_seconds = 6000.0;
    tbo_vl::db::import_content_items(&ctx.pool, &[longer]).await.unwrap();

    let corrected = ctx
        .engine
        .report_progress(user, ctx.free.guid, at(590.0), Utc::now())
        .await
        .unwrap();

    assert_eq!(corrected.record.progress.total_duration_seconds, 6000.0);
    assert!(corrected.record.progress.percentage < 90.0);
    assert!(corrected.record.completed());
    assert_eq!(corrected.record.progress_state(), ProgressState::Completed);
}

#[tokio::test]
async fn test_short_preview_position_does_not_complete() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let mut rx = ctx.engine.event_bus().subscribe();

    let update = ctx
        .engine
        .report_progress(user, ctx.preview.guid, at(100.0), Utc::now())
        .await
        .unwrap();

    assert!(!update.newly_completed);
    assert!(!update.record.completed());
    assert_eq!(update.record.progress.total_duration_seconds, 3600.0);
    assert!(update.record.progress.percentage < 3.0);
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, TboEvent::ContentCompleted { .. })));
}

#[tokio::test]
async fn test_preview_boundary() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    ctx.engine
        .report_progress(user, ctx.preview.guid, at(90.0), Utc::now())
        .await
        .unwrap();

    let result = ctx
        .engine
        .report_progress(user, ctx.preview.guid, at(130.0), Utc::now())
        .await;
    assert!(matches!(
        result,
        Err(Error::BoundaryViolation {
            reason: AccessReason::PreviewLimited,
            max_playback_seconds: Some(max),
            ..
        }) if max == 120.0
    ));

    // Rejected report left the record untouched
    let record = ctx.engine.get_entitlement(user, ctx.preview.guid).await.unwrap();
    assert_eq!(record.progress.current_position_seconds, 90.0);
    assert_eq!(record.watch_session_count, 1);
    assert_eq!(record.access_type, AccessType::Preview);
}

#[tokio::test]
async fn test_premium_progress_without_grant_requires_payment() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    let result = ctx
        .engine
        .report_progress(user, ctx.premium.guid, at(10.0), Utc::now())
        .await;

    assert!(matches!(result, Err(Error::PaymentRequired { .. })));
    assert_eq!(entitlement_count(&ctx.pool, user, ctx.premium.guid).await, 0);
}

// =============================================================================
// Revocation, extension, library
// =============================================================================

#[tokio::test]
async fn test_revoke_keeps_history_and_is_idempotent() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let now = Utc::now();
    let mut rx = ctx.engine.event_bus().subscribe();

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), now)
        .await
        .unwrap();
    ctx.engine
        .report_progress(user, ctx.premium.guid, at(3500.0), now)
        .await
        .unwrap();

    let revoked = ctx.engine.revoke(user, ctx.premium.guid, now).await.unwrap();
    assert!(!revoked.active);
    assert!(revoked.completed());
    assert_eq!(revoked.grant_state(now), GrantState::Revoked);

    ctx.engine.revoke(user, ctx.premium.guid, now).await.unwrap();
    let revocations = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, TboEvent::EntitlementRevoked { .. }))
        .count();
    assert_eq!(revocations, 1);

    let decision = ctx.engine.check_access(user, ctx.premium.guid, now).await.unwrap();
    assert_eq!(decision.reason, AccessReason::EntitlementRevoked);

    assert!(matches!(
        ctx.engine.revoke(Uuid::new_v4(), ctx.premium.guid, now).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_extend_grant() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let mut confirmation = payment(user, &ctx.premium, "pay_1");
    confirmation.expires_at = Some(now + Duration::hours(1));
    ctx.engine.apply_payment_confirmation(confirmation, now).await.unwrap();

    let new_expiry = storage_precision(now + Duration::days(30));
    let extended = ctx
        .engine
        .extend_grant(user, ctx.premium.guid, Some(new_expiry), now)
        .await
        .unwrap();
    assert_eq!(extended.expires_at, Some(new_expiry));
    assert!(ctx
        .engine
        .check_access(user, ctx.premium.guid, now + Duration::days(2))
        .await
        .unwrap()
        .allowed);

    assert!(matches!(
        ctx.engine
            .extend_grant(user, ctx.premium.guid, Some(now - Duration::hours(1)), now)
            .await,
        Err(Error::InvalidState(_))
    ));

    // Extension does not undo a revocation
    ctx.engine.revoke(user, ctx.premium.guid, now).await.unwrap();
    let still_revoked = ctx
        .engine
        .extend_grant(user, ctx.premium.guid, None, now)
        .await
        .unwrap();
    assert!(!still_revoked.active);
    assert_eq!(still_revoked.expires_at, None);

    assert!(matches!(
        ctx.engine
            .extend_grant(Uuid::new_v4(), ctx.premium.guid, None, now)
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_library_lists_most_recently_watched_first() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), now)
        .await
        .unwrap();
    ctx.engine
        .report_progress(user, ctx.free.guid, at(60.0), now)
        .await
        .unwrap();
    ctx.engine
        .report_progress(user, ctx.preview.guid, at(30.0), now + Duration::minutes(1))
        .await
        .unwrap();

    let library = ctx.engine.list_library(user, now + Duration::minutes(2)).await.unwrap();
    let order: Vec<Uuid> = library.iter().map(|e| e.content.guid).collect();
    assert_eq!(order, vec![ctx.preview.guid, ctx.free.guid, ctx.premium.guid]);

    let premium = &library[2];
    assert_eq!(premium.grant_state, GrantState::Granted);
    assert_eq!(premium.progress_state, ProgressState::NotStarted);
    assert_eq!(premium.decision.reason, AccessReason::Entitled);

    assert_eq!(library[0].decision.reason, AccessReason::PreviewLimited);
    assert_eq!(library[0].progress_state, ProgressState::InProgress);

    assert!(ctx.engine.list_library(Uuid::new_v4(), now).await.unwrap().is_empty());
}

// =============================================================================
// Engine instances sharing one database
// =============================================================================

#[tokio::test]
async fn test_stale_row_version_is_not_written() {
    let ctx = setup().await;
    let user = Uuid::new_v4();

    ctx.engine
        .report_progress(user, ctx.free.guid, at(60.0), Utc::now())
        .await
        .unwrap();

    let stored = tbo_vl::db::fetch_entitlement(&ctx.pool, user, ctx.free.guid)
        .await
        .unwrap()
        .unwrap();

    let mut first = stored.clone();
    first.progress.current_position_seconds = 300.0;
    first.watch_session_count = 2;
    assert!(tbo_vl::db::update_entitlement(&ctx.pool, &first).await.unwrap());

    let mut stale = stored;
    stale.progress.current_position_seconds = 10.0;
    stale.watch_session_count = 2;
    assert!(!tbo_vl::db::update_entitlement(&ctx.pool, &stale).await.unwrap());

    let record = ctx.engine.get_entitlement(user, ctx.free.guid).await.unwrap();
    assert_eq!(record.progress.current_position_seconds, 300.0);
    assert_eq!(record.row_version, first.row_version + 1);
}

#[tokio::test]
async fn test_progress_racing_revoke_on_another_engine() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let content_id = ctx.premium.guid;
    let peer = peer_engine(&ctx);

    ctx.engine
        .apply_payment_confirmation(payment(user, &ctx.premium, "pay_1"), Utc::now())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 1..=10 {
        let engine = peer_engine(&ctx);
        handles.push(tokio::spawn(async move {
            let position = (i * 100) as f64;
            let result = engine
                .report_progress(user, content_id, at(position), Utc::now())
                .await;
            (position, result)
        }));
    }
    let revoker = tokio::spawn(async move { peer.revoke(user, content_id, Utc::now()).await });

    let mut accepted = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            (position, Ok(update)) => {
                assert!(update.record.active);
                accepted.push(position);
            }
            (_, Err(Error::BoundaryViolation { reason, .. })) => {
                assert_eq!(reason, AccessReason::EntitlementRevoked);
            }
            (_, Err(other)) => panic!("unexpected error: {:?}", other),
        }
    }
    let revoked = revoker.await.unwrap().unwrap();
    assert!(!revoked.active);

    let record = ctx.engine.get_entitlement(user, content_id).await.unwrap();
    let furthest = accepted.iter().copied().fold(0.0, f64::max);
    assert!(!record.active);
    assert_eq!(record.payment_ref.as_deref(), Some("pay_1"));
    assert_eq!(record.watch_session_count, accepted.len() as i64);
    assert_eq!(record.progress.current_position_seconds, furthest);
    assert!((record.progress.percentage - furthest / 36.0).abs() < 1e-9);
    assert_eq!(entitlement_count(&ctx.pool, user, content_id).await, 1);
}

#[tokio::test]
async fn test_preview_progress_racing_payment_on_another_engine() {
    let ctx = setup().await;
    let user = Uuid::new_v4();
    let content_id = ctx.preview.guid;
    let peer = peer_engine(&ctx);

    let mut handles = Vec::new();
    for i in 1..=10 {
        let engine = peer_engine(&ctx);
        handles.push(tokio::spawn(async move {
            engine
                .report_progress(user, content_id, at((i * 10) as f64), Utc::now())
                .await
        }));
    }
    let confirmation = payment(user, &ctx.preview, "pay_preview");
    let payer = tokio::spawn(async move { peer.apply_payment_confirmation(confirmation, Utc::now()).await });

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    payer.await.unwrap().unwrap();

    let record = ctx.engine.get_entitlement(user, content_id).await.unwrap();
    assert!(record.active);
    assert_eq!(record.access_type, AccessType::Premium);
    assert_eq!(record.payment_ref.as_deref(), Some("pay_preview"));
    assert_eq!(record.watch_session_count, 10);
    assert_eq!(record.progress.current_position_seconds, 100.0);
    assert_eq!(entitlement_count(&ctx.pool, user, content_id).await, 1);
}
