use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use file_relay_core::clock::{Clock, ManualClock};
use file_relay_core::gate::{
    AccessDecision, AccessGate, AccessGrant, AccessPolicy, Challenge, VerificationOutcome,
};
use file_relay_core::ledger::{Redemption, TokenLedger, TokenStatus};
use file_relay_core::link::{LinkBuilder, StartParam};
use file_relay_core::model::{ContentKind, FileHandle, FileRecord, StorageLocation};
use file_relay_core::shortlink::{Shortener, ShortlinkError};
use file_relay_core::storage::{InMemoryStorage, RelayStore, StorageError};
use file_relay_core::sweeper::ExpirySweeper;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    gate: AccessGate,
    ledger: Arc<TokenLedger>,
    store: Arc<InMemoryStorage>,
    clock: Arc<ManualClock>,
}

struct UnreachableShortener;

#[async_trait]
impl Shortener for UnreachableShortener {
    async fn shorten(&self, _long_url: &str) -> Result<String, ShortlinkError> {
        Err(ShortlinkError::Status(502))
    }
}

struct HangingShortener;

#[async_trait]
impl Shortener for HangingShortener {
    async fn shorten(&self, _long_url: &str) -> Result<String, ShortlinkError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("https://too.late/x".to_string())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness(shortener: Arc<dyn Shortener>, shortlink_timeout: Duration) -> Harness {
    init_tracing();
    let store = Arc::new(InMemoryStorage::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let policy = AccessPolicy {
        shortlink_timeout,
        ..AccessPolicy::default()
    };
    let ledger = Arc::new(TokenLedger::new(store.clone(), clock.clone(), policy.validity));
    let gate = AccessGate::new(
        store.clone(),
        ledger.clone(),
        shortener,
        LinkBuilder::new("FileRelayBot"),
        clock.clone(),
        policy,
    );
    Harness {
        gate,
        ledger,
        store,
        clock,
    }
}

async fn upload(h: &Harness, name: &str) -> Result<FileRecord, StorageError> {
    let record = FileRecord {
        handle: FileHandle::generate(),
        file_name: name.to_string(),
        file_size: 1_048_576,
        kind: ContentKind::Video,
        location: StorageLocation {
            chat_id: -100_200,
            message_id: 42,
        },
        uploaded_by: 1,
        uploaded_at: h.clock.now(),
    };
    h.store.insert_file(record.clone()).await?;
    Ok(record)
}

async fn exhaust_quota(h: &Harness, user: i64, file: &FileRecord) -> Result<(), StorageError> {
    for _ in 0..3 {
        let decision = h.gate.request_file(user, None, &file.handle).await?;
        assert!(matches!(decision, AccessDecision::Deliver { .. }));
    }
    Ok(())
}

async fn challenge(h: &Harness, user: i64, file: &FileRecord) -> Result<Challenge, StorageError> {
    match h.gate.request_file(user, None, &file.handle).await? {
        AccessDecision::Challenge(challenge) => Ok(challenge),
        other => panic!("expected a challenge, got {other:?}"),
    }
}

#[tokio::test]
async fn quota_boundary_is_three_deliveries() -> Result<(), StorageError> {
    let h = harness(Arc::new(UnreachableShortener), Duration::from_secs(1));
    let file = upload(&h, "a.mkv").await?;
    let other = upload(&h, "b.mkv").await?;

    // Quota is per account, not per file
    let mut counters = Vec::new();
    for f in [&file, &other, &file] {
        match h.gate.request_file(9, Some("viewer".to_string()), &f.handle).await? {
            AccessDecision::Deliver {
                grant: AccessGrant::FreeQuota { used, .. },
                ..
            } => counters.push(used),
            decision => panic!("expected free delivery, got {decision:?}"),
        }
    }
    assert_eq!(counters, vec![1, 2, 3]);

    let challenge = challenge(&h, 9, &other).await?;
    assert_eq!(challenge.free_limit, 3);
    let account = h.store.get_account(9).await?;
    assert_eq!(account.as_ref().map(|a| a.files_accessed), Some(3));
    assert_eq!(account.and_then(|a| a.username), Some("viewer".to_string()));
    Ok(())
}

#[tokio::test]
async fn premium_always_delivers() -> Result<(), StorageError> {
    let h = harness(Arc::new(UnreachableShortener), Duration::from_secs(1));
    let file = upload(&h, "a.mkv").await?;

    exhaust_quota(&h, 9, &file).await?;
    let pending = challenge(&h, 9, &file).await?;
    h.gate.set_premium(9, true).await?;

    for _ in 0..5 {
        let decision = h.gate.request_file(9, None, &file.handle).await?;
        assert_eq!(
            decision,
            AccessDecision::Deliver {
                file: file.clone(),
                grant: AccessGrant::Premium
            }
        );
    }

    // A premium user's outstanding challenge still works and still resets
    assert_eq!(
        h.gate.redeem_verification(9, &pending.token).await?,
        VerificationOutcome::Delivered(file.clone())
    );

    h.gate.set_premium(9, false).await?;
    let decision = h.gate.request_file(9, None, &file.handle).await?;
    assert!(matches!(
        decision,
        AccessDecision::Deliver {
            grant: AccessGrant::FreeQuota { used: 1, limit: 3 },
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn verification_round_trip_then_reuse_fails() -> Result<(), StorageError> {
    let h = harness(Arc::new(UnreachableShortener), Duration::from_secs(1));
    let file = upload(&h, "lecture.mp4").await?;
    exhaust_quota(&h, 5, &file).await?;

    let challenge = challenge(&h, 5, &file).await?;
    let Some(StartParam::Verify(token)) =
        StartParam::parse(challenge.link.rsplit("start=").next().unwrap_or_default())
    else {
        panic!("challenge link does not carry a verification token: {}", challenge.link);
    };
    assert_eq!(token, challenge.token);

    h.clock.advance(TimeDelta::hours(5));
    assert_eq!(
        h.gate.redeem_verification(5, &token).await?,
        VerificationOutcome::Delivered(file.clone())
    );
    assert_eq!(
        h.store.get_account(5).await?.map(|a| a.files_accessed),
        Some(0)
    );
    assert_eq!(
        h.gate.redeem_verification(5, &token).await?,
        VerificationOutcome::Failed
    );

    // Quota is restored
    let decision = h.gate.request_file(5, None, &file.handle).await?;
    assert!(matches!(
        decision,
        AccessDecision::Deliver {
            grant: AccessGrant::FreeQuota { used: 1, .. },
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn reset_invalidates_every_outstanding_token() -> Result<(), StorageError> {
    let h = harness(Arc::new(UnreachableShortener), Duration::from_secs(1));
    let first = upload(&h, "one.pdf").await?;
    let second = upload(&h, "two.pdf").await?;
    exhaust_quota(&h, 5, &first).await?;

    let a = challenge(&h, 5, &first).await?;
    let b = challenge(&h, 5, &second).await?;

    assert!(h.gate.reset_user(5).await?);
    assert_eq!(
        h.gate.redeem_verification(5, &a.token).await?,
        VerificationOutcome::Failed
    );
    assert_eq!(
        h.gate.time_remaining(5, &b.token).await?,
        TokenStatus::NotFound
    );
    assert_eq!(h.store.token_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn expired_token_fails_and_is_swept() -> Result<(), StorageError> {
    let h = harness(Arc::new(UnreachableShortener), Duration::from_secs(1));
    let file = upload(&h, "slides.pptx").await?;
    exhaust_quota(&h, 5, &file).await?;
    let challenge = challenge(&h, 5, &file).await?;

    h.clock.advance(TimeDelta::hours(7));
    assert_eq!(
        h.gate.time_remaining(5, &challenge.token).await?,
        TokenStatus::Expired
    );
    assert_eq!(
        h.ledger.redeem(5, &challenge.token).await?,
        Redemption::NotFound
    );
    assert_eq!(
        h.gate.redeem_verification(5, &challenge.token).await?,
        VerificationOutcome::Failed
    );
    assert_eq!(
        h.store.get_account(5).await?.map(|a| a.files_accessed),
        Some(3)
    );

    let sweeper = ExpirySweeper::new(h.ledger.clone(), Duration::from_secs(3600));
    assert_eq!(sweeper.sweep_once().await, Some(1));
    assert_eq!(
        h.gate.time_remaining(5, &challenge.token).await?,
        TokenStatus::NotFound
    );
    Ok(())
}

#[tokio::test]
async fn token_expires_exactly_at_six_hours() -> Result<(), StorageError> {
    let h = harness(Arc::new(UnreachableShortener), Duration::from_secs(1));
    let file = upload(&h, "x.zip").await?;
    exhaust_quota(&h, 5, &file).await?;
    let challenge = challenge(&h, 5, &file).await?;

    h.clock.advance(TimeDelta::hours(6));
    assert_eq!(
        h.gate.redeem_verification(5, &challenge.token).await?,
        VerificationOutcome::Failed
    );
    Ok(())
}

#[tokio::test]
async fn shortlink_timeout_falls_back_to_direct_link() -> Result<(), StorageError> {
    let h = harness(Arc::new(HangingShortener), Duration::from_millis(50));
    let file = upload(&h, "a.mkv").await?;
    exhaust_quota(&h, 5, &file).await?;

    let started = std::time::Instant::now();
    let challenge = challenge(&h, 5, &file).await?;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(!challenge.is_shortened());
    assert_eq!(
        challenge.link,
        format!("https://t.me/FileRelayBot?start=verify_{}", challenge.token)
    );
    assert_eq!(
        h.gate.redeem_verification(5, &challenge.token).await?,
        VerificationOutcome::Delivered(file)
    );
    Ok(())
}
