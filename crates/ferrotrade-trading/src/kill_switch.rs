//! Global trading gate.
//!
//! The switch lives in a durable record behind [`KillSwitchRepository`].
//! Reads are never cached: every order submission asks the store. Any doubt
//! (unreachable store, missing record, no store configured) reads as active.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ferrotrade_core::UtcDateTime;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{KillSwitchError, StoreError};

/// Stored kill switch state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillSwitchState {
    /// `true` blocks all order submissions.
    pub active: bool,
    pub reason: Option<String>,
    pub updated_by: Option<String>,
    pub last_updated: UtcDateTime,
    pub version: u64,
}

impl KillSwitchState {
    pub const fn status(&self) -> &'static str {
        if self.active {
            "ON"
        } else {
            "OFF"
        }
    }
}

/// Durable storage for the singleton kill switch record.
#[async_trait]
pub trait KillSwitchRepository: Send + Sync {
    async fn load(&self) -> Result<Option<KillSwitchState>, StoreError>;

    /// Write `state` when the stored version equals `expected_version`
    /// (`None`: no record yet). Returns `false` when the condition fails.
    async fn put_if_version(
        &self,
        expected_version: Option<u64>,
        state: &KillSwitchState,
    ) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct KillSwitchStore {
    repository: Option<Arc<dyn KillSwitchRepository>>,
}

impl KillSwitchStore {
    pub fn new(repository: Arc<dyn KillSwitchRepository>) -> Self {
        Self {
            repository: Some(repository),
        }
    }

    /// Store with no backing record; always reports active.
    pub fn unconfigured() -> Self {
        Self { repository: None }
    }

    /// Whether trading is blocked. Fail-safe: errors and absence read as `true`.
    pub async fn is_active(&self) -> bool {
        let Some(repository) = &self.repository else {
            warn!("kill switch store is not configured; treating switch as active");
            return true;
        };
        match repository.load().await {
            Ok(Some(state)) => state.active,
            Ok(None) => {
                warn!("kill switch record is missing; treating switch as active");
                true
            }
            Err(err) => {
                error!(error = %err, "kill switch read failed; treating switch as active");
                true
            }
        }
    }

    pub async fn activate(
        &self,
        reason: &str,
        actor: &str,
    ) -> Result<KillSwitchState, KillSwitchError> {
        let state = self.write(true, Some(reason.to_owned()), actor).await?;
        warn!(actor, reason, version = state.version, "kill switch activated");
        Ok(state)
    }

    pub async fn deactivate(&self, actor: &str) -> Result<KillSwitchState, KillSwitchError> {
        let state = self.write(false, None, actor).await?;
        info!(actor, version = state.version, "kill switch deactivated");
        Ok(state)
    }

    /// Full stored record, `None` when it was never written.
    pub async fn status_detail(&self) -> Result<Option<KillSwitchState>, KillSwitchError> {
        Ok(self.repository()?.load().await?)
    }

    async fn write(
        &self,
        active: bool,
        reason: Option<String>,
        actor: &str,
    ) -> Result<KillSwitchState, KillSwitchError> {
        let repository = self.repository()?;
        let expected = repository.load().await?.map(|state| state.version);
        let next = KillSwitchState {
            active,
            reason,
            updated_by: Some(actor.to_owned()),
            last_updated: UtcDateTime::now(),
            version: expected.map_or(1, |version| version + 1),
        };

        if repository.put_if_version(expected, &next).await? {
            Ok(next)
        } else {
            Err(KillSwitchError::Conflict { expected })
        }
    }

    fn repository(&self) -> Result<&Arc<dyn KillSwitchRepository>, KillSwitchError> {
        self.repository.as_ref().ok_or_else(|| {
            KillSwitchError::Store(StoreError::Unavailable(String::from(
                "kill switch store is not configured",
            )))
        })
    }
}

/// Process-local repository for tests and the paper setup.
#[derive(Debug, Default)]
pub struct InMemoryKillSwitchRepository {
    state: Mutex<Option<KillSwitchState>>,
    unreachable: Mutex<bool>,
}

impl InMemoryKillSwitchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backing store were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = unreachable;
    }

    /// Replace the stored record without a version check.
    pub fn overwrite(&self, state: Option<KillSwitchState>) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if *self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(StoreError::Unavailable(String::from(
                "kill switch store unreachable",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KillSwitchRepository for InMemoryKillSwitchRepository {
    async fn load(&self) -> Result<Option<KillSwitchState>, StoreError> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn put_if_version(
        &self,
        expected_version: Option<u64>,
        state: &KillSwitchState,
    ) -> Result<bool, StoreError> {
        self.check_reachable()?;
        let mut stored = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if stored.as_ref().map(|current| current.version) != expected_version {
            return Ok(false);
        }
        *stored = Some(state.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Repository whose record changes between `load` and `put_if_version`.
    struct RacingRepository {
        inner: InMemoryKillSwitchRepository,
    }

    #[async_trait]
    impl KillSwitchRepository for RacingRepository {
        async fn load(&self) -> Result<Option<KillSwitchState>, StoreError> {
            self.inner.load().await
        }

        async fn put_if_version(
            &self,
            _expected_version: Option<u64>,
            state: &KillSwitchState,
        ) -> Result<bool, StoreError> {
            let mut competing = state.clone();
            competing.updated_by = Some(String::from("other-operator"));
            self.inner.overwrite(Some(competing));
            self.inner.put_if_version(Some(0), state).await
        }
    }

    #[tokio::test]
    async fn fail_safe_when_unconfigured_empty_or_unreachable() {
        assert!(KillSwitchStore::unconfigured().is_active().await);

        let repository = Arc::new(InMemoryKillSwitchRepository::new());
        let store = KillSwitchStore::new(repository.clone());
        assert!(store.is_active().await);

        store.deactivate("ops").await.expect("deactivate");
        assert!(!store.is_active().await);

        repository.set_unreachable(true);
        assert!(store.is_active().await);
    }

    #[tokio::test]
    async fn activate_and_deactivate_bump_version() {
        let store = KillSwitchStore::new(Arc::new(InMemoryKillSwitchRepository::new()));

        let on = store.activate("drawdown", "risk-desk").await.expect("on");
        assert_eq!(on.version, 1);
        assert_eq!(on.status(), "ON");
        assert!(store.is_active().await);

        let off = store.deactivate("risk-desk").await.expect("off");
        assert_eq!(off.version, 2);
        assert!(off.reason.is_none());

        let detail = store.status_detail().await.expect("detail").expect("record");
        assert_eq!(detail, off);
    }

    #[tokio::test]
    async fn concurrent_modification_is_a_conflict() {
        let store = KillSwitchStore::new(Arc::new(RacingRepository {
            inner: InMemoryKillSwitchRepository::new(),
        }));

        let err = store.activate("halt", "ops").await.expect_err("conflict");
        assert!(matches!(err, KillSwitchError::Conflict { expected: None }));
    }
}
