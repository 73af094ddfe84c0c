//! Integration tests for Sealya
//!
//! These tests verify end-to-end functionality including:
//! - Restart persistence over an on-disk database
//! - Identity recovery from the snapshot
//! - Usage limits, upgrades and month rollover

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sealya::app::{AppState, ComposeOutcome, LimitKind};
use sealya::clock::{Clock, ManualClock};
use sealya::config::{LETTERS_KEY, MIRROR_IDENTITY_ID, USER_KEY};
use sealya::database::{LetterDraft, Seal};
use sealya::services::{Recovery, ThemeMode, UpgradeOutcome};
use std::sync::Arc;
use tempfile::TempDir;

fn token() -> String {
    let claims = r#"{"sub":"user-9","email":"mae@example.com","name":"Mae","picture":null}"#;
    format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", URL_SAFE_NO_PAD.encode(claims))
}

fn draft(title: &str, scheduled_for: Option<DateTime<Utc>>) -> LetterDraft {
    LetterDraft {
        title: title.to_string(),
        label: "journal".to_string(),
        content: format!("{} content", title),
        emoji: Seal::Sparkles,
        scheduled_for,
    }
}

/// Open the state and close it again, as a restart would
async fn open(temp: &TempDir, clock: &Arc<ManualClock>) -> AppState {
    AppState::open(temp.path().to_path_buf(), clock.clone())
        .await
        .unwrap()
}

async fn close(state: AppState) {
    state.close().await;
}

fn start_clock() -> Arc<ManualClock> {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap())
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp = TempDir::new().unwrap();
    let clock = start_clock();

    let state = open(&temp, &clock).await;
    assert_eq!(state.recovery, Recovery::Anonymous);
    state.login(&token()).await.unwrap();
    state.compose_letter(draft("first", None)).await.unwrap();
    state.theme.set_mode(ThemeMode::Sync).await.unwrap();
    close(state).await;

    let state = open(&temp, &clock).await;
    assert_eq!(
        state.recovery,
        Recovery::Store {
            source: "primary",
            healed: false
        }
    );
    assert_eq!(state.identity.current().await.unwrap().name, "Mae");
    assert_eq!(state.letters.list().await.len(), 1);
    assert_eq!(state.theme.mode().await, ThemeMode::Sync);
    assert_eq!(
        state
            .subscription
            .usage_stats()
            .await
            .letters_this_month,
        1
    );
    close(state).await;
}

#[tokio::test]
async fn test_snapshot_restores_everything() {
    let temp = TempDir::new().unwrap();
    let clock = start_clock();

    let state = open(&temp, &clock).await;
    state.login(&token()).await.unwrap();
    state.compose_letter(draft("keep me", None)).await.unwrap();
    state.subscription.upgrade("plus").await.unwrap();
    state.on_visibility_hidden().await;

    // Primary corrupt, mirror gone, letters wiped
    state.repo.set_item(USER_KEY, "{broken").await.unwrap();
    state
        .mirror
        .delete_mirror_record(MIRROR_IDENTITY_ID)
        .await
        .unwrap();
    state.repo.remove_item(LETTERS_KEY).await.unwrap();
    close(state).await;

    let state = open(&temp, &clock).await;
    assert!(matches!(state.recovery, Recovery::Snapshot { .. }));
    assert_eq!(state.identity.current().await.unwrap().id, "user-9");

    let letters = state.letters.list().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].title, "keep me");
    assert_eq!(
        state.subscription.current_tier().await,
        sealya::catalog::Tier::Plus
    );
    close(state).await;

    // Recovered identity was written back to the primary store
    let state = open(&temp, &clock).await;
    assert_eq!(
        state.recovery,
        Recovery::Store {
            source: "primary",
            healed: false
        }
    );
    close(state).await;
}

#[tokio::test]
async fn test_mirror_database_outlives_main_database() {
    let temp = TempDir::new().unwrap();
    let clock = start_clock();

    let state = open(&temp, &clock).await;
    state.login(&token()).await.unwrap();
    close(state).await;

    for file in ["sealya.sqlite", "sealya.sqlite-wal", "sealya.sqlite-shm"] {
        let path = temp.path().join(file);
        if path.exists() {
            std::fs::remove_file(path).unwrap();
        }
    }
    assert!(temp.path().join("identity-mirror.sqlite").exists());

    let state = open(&temp, &clock).await;
    assert_eq!(
        state.recovery,
        Recovery::Store {
            source: "mirror",
            healed: true
        }
    );
    assert_eq!(state.identity.current().await.unwrap().id, "user-9");
    close(state).await;

    // The fresh main database was healed from the mirror
    let state = open(&temp, &clock).await;
    assert_eq!(
        state.recovery,
        Recovery::Store {
            source: "primary",
            healed: false
        }
    );
    close(state).await;
}

#[tokio::test]
async fn test_logout_survives_restart() {
    let temp = TempDir::new().unwrap();
    let clock = start_clock();

    let state = open(&temp, &clock).await;
    state.login(&token()).await.unwrap();
    state.logout().await.unwrap();
    close(state).await;

    let state = open(&temp, &clock).await;
    assert_eq!(state.recovery, Recovery::Anonymous);
    assert!(!state.identity.is_authenticated().await);
    close(state).await;
}

#[tokio::test]
async fn test_limit_then_upgrade() {
    let temp = TempDir::new().unwrap();
    let clock = start_clock();
    let state = open(&temp, &clock).await;

    for i in 0..20 {
        let outcome = state
            .compose_letter(draft(&format!("letter {}", i), None))
            .await
            .unwrap();
        assert!(matches!(outcome, ComposeOutcome::Sealed { .. }));
    }

    let outcome = state.compose_letter(draft("one too many", None)).await.unwrap();
    assert!(matches!(
        outcome,
        ComposeOutcome::LimitReached {
            limit: LimitKind::Letters,
            ..
        }
    ));

    let rejected = state.subscription.upgrade("platinum").await.unwrap();
    assert!(matches!(rejected, UpgradeOutcome::Rejected { .. }));

    let upgraded = state.subscription.upgrade("plus").await.unwrap();
    assert!(matches!(upgraded, UpgradeOutcome::Upgraded { .. }));

    let outcome = state.compose_letter(draft("one more", None)).await.unwrap();
    assert!(matches!(outcome, ComposeOutcome::Sealed { .. }));
    assert_eq!(state.letters.list().await.len(), 21);
    close(state).await;
}

#[tokio::test]
async fn test_month_rollover_resets_counters() {
    let temp = TempDir::new().unwrap();
    let clock = start_clock();
    let state = open(&temp, &clock).await;

    for i in 0..3 {
        state
            .compose_letter(draft(&format!("jan {}", i), None))
            .await
            .unwrap();
    }
    assert_eq!(
        state
            .subscription
            .usage_stats()
            .await
            .letters_this_month,
        3
    );

    clock.set(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 1).unwrap());

    let usage = state.subscription.usage_stats().await;
    assert_eq!(usage.letters_this_month, 0);
    assert_eq!(state.letters.list().await.len(), 3);
    close(state).await;
}

#[tokio::test]
async fn test_undo_window_and_schedule_lock() {
    let temp = TempDir::new().unwrap();
    let clock = start_clock();
    let state = open(&temp, &clock).await;

    let ComposeOutcome::Sealed { letter: quick } =
        state.compose_letter(draft("oops", None)).await.unwrap()
    else {
        panic!("letter was not sealed");
    };
    clock.advance(Duration::seconds(5));
    assert!(state.letters.undo(&quick.id).await.unwrap());

    let ComposeOutcome::Sealed { letter: kept } =
        state.compose_letter(draft("kept", None)).await.unwrap()
    else {
        panic!("letter was not sealed");
    };
    clock.advance(Duration::seconds(11));
    assert!(!state.letters.undo(&kept.id).await.unwrap());
    assert!(state.letters.get(&kept.id).await.is_some());

    let unlock_at = clock.now() + Duration::days(1);
    let ComposeOutcome::Sealed { letter: future } = state
        .compose_letter(draft("tomorrow", Some(unlock_at)))
        .await
        .unwrap()
    else {
        panic!("letter was not sealed");
    };
    assert!(!state.letters.can_open(&future.id).await);

    clock.set(unlock_at);
    assert!(state.letters.can_open(&future.id).await);
    close(state).await;
}
