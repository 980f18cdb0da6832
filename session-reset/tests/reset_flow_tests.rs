//! End-to-end tests for the clear-all-data flow
//!
//! These tests drive `ResetCoordinator` with in-memory collaborators:
//! - Confirmation window boundaries
//! - Remote teardown ordering and skipping
//! - Preservation allowlist behaviour
//! - Invalidation delivery after purge

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::advance;

use session_reset::error::StorageError;
use session_reset::storage::{MemoryCache, MemorySecureStorage};
use session_reset::{
    InvalidationBus, InvalidationEvent, LocalCache, ResetConfig, ResetCoordinator, ResetOutcome,
    ResetPhase, SecureStorage, TeardownBackend, TeardownError, TeardownReport, WorkerId,
};

/// Backend that records every call it receives
#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<String>>,
    fail_all: bool,
}

#[async_trait]
impl TeardownBackend for RecordingBackend {
    async fn leave_all_groups(&self, worker_id: &WorkerId) -> Result<(), TeardownError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("leave-all:{}", worker_id));
        if self.fail_all {
            return Err(TeardownError::Other("offline".to_string()));
        }
        Ok(())
    }

    async fn purge_user(&self, worker_id: &WorkerId) -> Result<(), TeardownError> {
        self.calls.lock().unwrap().push(format!("purge:{}", worker_id));
        if self.fail_all {
            return Err(TeardownError::Other("offline".to_string()));
        }
        Ok(())
    }
}

/// Cache whose batch removal always fails
struct BrokenCache {
    inner: MemoryCache,
}

#[async_trait]
impl LocalCache for BrokenCache {
    async fn list_keys(&self) -> Result<std::collections::BTreeSet<String>, StorageError> {
        self.inner.list_keys().await
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        self.inner.set(key, value).await
    }

    async fn remove_many(&self, _keys: &[String]) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".to_string()))
    }
}

/// Secure storage where reading one key always fails
struct UnreadableKey {
    inner: MemorySecureStorage,
    key: &'static str,
}

#[async_trait]
impl SecureStorage for UnreadableKey {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if key == self.key {
            return Err(StorageError::Read {
                key: key.to_string(),
                reason: "keystore locked".to_string(),
            });
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

struct Harness {
    secure: Arc<MemorySecureStorage>,
    cache: Arc<MemoryCache>,
    backend: Arc<RecordingBackend>,
    bus: InvalidationBus,
    coordinator: ResetCoordinator,
}

async fn signed_in_secure() -> Arc<MemorySecureStorage> {
    let secure = Arc::new(MemorySecureStorage::new());
    secure.set("workerId", "w-17").await.unwrap();
    secure.set("displayName", "Ana").await.unwrap();
    secure.set("activeGroupId", "g-3").await.unwrap();
    secure.set("sessionToken", "tok-abc").await.unwrap();
    secure
}

fn scenario_cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::from_entries([
        ("onboardingSeen", json!(true)),
        ("hide_permission_banner", json!(true)),
        ("recentSearch", json!("x")),
        ("draftNote", json!("y")),
    ]))
}

fn harness(secure: Arc<MemorySecureStorage>, backend: RecordingBackend) -> Harness {
    let cache = scenario_cache();
    let backend = Arc::new(backend);
    let bus = InvalidationBus::new();
    let coordinator = ResetCoordinator::from_config(
        &ResetConfig::default(),
        secure.clone(),
        cache.clone(),
        backend.clone(),
        bus.clone(),
    );
    Harness {
        secure,
        cache,
        backend,
        bus,
        coordinator,
    }
}

async fn confirm(coordinator: &ResetCoordinator) -> session_reset::ResetReport {
    assert!(matches!(
        coordinator.request_reset().await,
        ResetOutcome::AwaitingConfirmation { .. }
    ));
    match coordinator.request_reset().await {
        ResetOutcome::Completed(report) => report,
        other => panic!("expected completed reset, got {:?}", other),
    }
}

#[cfg(test)]
mod gate_window_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_at_4900ms_proceeds() {
        let h = harness(signed_in_secure().await, RecordingBackend::default());

        h.coordinator.request_reset().await;
        advance(Duration::from_millis(4_900)).await;

        assert!(matches!(
            h.coordinator.request_reset().await,
            ResetOutcome::Completed(_)
        ));
        assert!(h.secure.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_at_5100ms_rearms() {
        let h = harness(signed_in_secure().await, RecordingBackend::default());

        h.coordinator.request_reset().await;
        advance(Duration::from_millis(5_100)).await;

        assert!(matches!(
            h.coordinator.request_reset().await,
            ResetOutcome::AwaitingConfirmation { .. }
        ));
        assert_eq!(h.coordinator.phase(), ResetPhase::Armed);
        assert_eq!(h.secure.len(), 4);
        assert!(h.backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_phase_expires_to_idle() {
        let h = harness(signed_in_secure().await, RecordingBackend::default());

        h.coordinator.request_reset().await;
        assert_eq!(h.coordinator.phase(), ResetPhase::Armed);

        advance(Duration::from_secs(6)).await;
        assert_eq!(h.coordinator.phase(), ResetPhase::Idle);
    }
}

#[cfg(test)]
mod teardown_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_reset_scenario() {
        let h = harness(signed_in_secure().await, RecordingBackend::default());

        let report = confirm(&h.coordinator).await;

        let mut calls = h.backend.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["leave-all:w-17", "purge:w-17"]);
        assert!(report.remote.fully_succeeded());
        assert!(report.purge_warning.is_none());

        assert!(h.secure.is_empty());
        assert_eq!(
            h.cache.snapshot(),
            json!({"onboardingSeen": true, "hide_permission_banner": true})
                .as_object()
                .unwrap()
                .clone()
        );
    }

    #[tokio::test]
    async fn test_logged_out_reset_makes_no_calls() {
        let h = harness(Arc::new(MemorySecureStorage::new()), RecordingBackend::default());

        let report = confirm(&h.coordinator).await;

        assert_eq!(report.remote, TeardownReport::Skipped);
        assert!(h.backend.calls.lock().unwrap().is_empty());
        assert!(report.purge_warning.is_none());
        assert_eq!(h.cache.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_backend_outage_does_not_block_local_reset() {
        let h = harness(
            signed_in_secure().await,
            RecordingBackend {
                fail_all: true,
                ..Default::default()
            },
        );

        let outcome = {
            h.coordinator.request_reset().await;
            h.coordinator.request_reset().await
        };

        assert_eq!(outcome.user_message(), "All app data has been cleared.");
        assert_eq!(h.backend.calls.lock().unwrap().len(), 2);
        assert!(h.secure.is_empty());
    }

    #[tokio::test]
    async fn test_cache_failure_is_advisory() {
        let secure = signed_in_secure().await;
        let cache = Arc::new(BrokenCache {
            inner: MemoryCache::from_entries([("draftNote", json!("y"))]),
        });
        let bus = InvalidationBus::new();
        let broadcasts = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let broadcasts = Arc::clone(&broadcasts);
            bus.subscribe(InvalidationEvent::AppDataCleared, move |_| {
                broadcasts.fetch_add(1, Ordering::SeqCst);
            })
        };
        let coordinator = ResetCoordinator::from_config(
            &ResetConfig::default(),
            secure.clone(),
            cache,
            Arc::new(RecordingBackend::default()),
            bus,
        );

        coordinator.request_reset().await;
        let outcome = coordinator.request_reset().await;

        let ResetOutcome::Completed(report) = &outcome else {
            panic!("expected completed reset");
        };
        assert!(report.purge_warning.is_some());
        assert_eq!(
            outcome.user_message(),
            "Something went wrong while clearing app data. Please try again."
        );
        // Identity is still cleared and listeners still hear about it
        assert!(secure.is_empty());
        assert_eq!(broadcasts.load(Ordering::SeqCst), 1);
    }
}

#[cfg(test)]
mod identity_read_tests {
    use super::*;

    async fn signed_in_with_unreadable(key: &'static str) -> Arc<UnreadableKey> {
        let inner = MemorySecureStorage::new();
        inner.set("workerId", "w-17").await.unwrap();
        inner.set("displayName", "Ana").await.unwrap();
        inner.set("sessionToken", "tok-abc").await.unwrap();
        Arc::new(UnreadableKey { inner, key })
    }

    fn coordinator_over(
        secure: Arc<UnreadableKey>,
        cache: Arc<MemoryCache>,
        backend: Arc<RecordingBackend>,
    ) -> ResetCoordinator {
        ResetCoordinator::from_config(
            &ResetConfig::default(),
            secure,
            cache,
            backend,
            InvalidationBus::new(),
        )
    }

    #[tokio::test]
    async fn test_unreadable_display_name_still_tears_down() {
        let secure = signed_in_with_unreadable("displayName").await;
        let backend = Arc::new(RecordingBackend::default());
        let coordinator = coordinator_over(secure.clone(), scenario_cache(), backend.clone());

        let report = confirm(&coordinator).await;

        assert!(report.remote.fully_succeeded());
        let mut calls = backend.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["leave-all:w-17", "purge:w-17"]);
        assert!(secure.inner.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_session_token_still_tears_down() {
        let secure = signed_in_with_unreadable("sessionToken").await;
        let backend = Arc::new(RecordingBackend::default());
        let coordinator = coordinator_over(secure.clone(), scenario_cache(), backend.clone());

        let report = confirm(&coordinator).await;

        assert!(matches!(report.remote, TeardownReport::Attempted { .. }));
        assert_eq!(backend.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_worker_id_skips_remote_but_purges() {
        let secure = signed_in_with_unreadable("workerId").await;
        let cache = scenario_cache();
        let backend = Arc::new(RecordingBackend::default());
        let coordinator = coordinator_over(secure.clone(), cache.clone(), backend.clone());

        let report = confirm(&coordinator).await;

        assert_eq!(report.remote, TeardownReport::Skipped);
        assert!(backend.calls.lock().unwrap().is_empty());
        assert!(report.purge_warning.is_none());
        assert!(secure.inner.is_empty());
        let remaining: Vec<String> = cache.snapshot().keys().cloned().collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&"onboardingSeen".to_string()));
    }
}

#[cfg(test)]
mod broadcast_tests {
    use super::*;

    #[tokio::test]
    async fn test_reset_without_subscribers_completes() {
        let h = harness(signed_in_secure().await, RecordingBackend::default());
        assert_eq!(h.bus.listener_count(InvalidationEvent::AppDataCleared), 0);

        let report = confirm(&h.coordinator).await;
        assert!(report.purge_warning.is_none());
    }

    #[tokio::test]
    async fn test_listeners_observe_purged_state() {
        let h = harness(signed_in_secure().await, RecordingBackend::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<_> = [
            InvalidationEvent::RecentActivityCleared,
            InvalidationEvent::AppDataCleared,
        ]
        .into_iter()
        .map(|event| {
            let seen = Arc::clone(&seen);
            let secure = h.secure.clone();
            let cache = h.cache.clone();
            h.bus.subscribe(event, move |e| {
                seen.lock()
                    .unwrap()
                    .push((e, secure.len(), cache.snapshot().len()));
            })
        })
        .collect();

        confirm(&h.coordinator).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (InvalidationEvent::RecentActivityCleared, 0, 2),
                (InvalidationEvent::AppDataCleared, 0, 2),
            ]
        );
        drop(subs);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_reset() {
        let h = harness(signed_in_secure().await, RecordingBackend::default());
        confirm(&h.coordinator).await;

        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let hits = Arc::clone(&hits);
            h.bus.subscribe(InvalidationEvent::AppDataCleared, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
