//! Session lifecycle for the stateful ppubs backend.
//!
//! ppubs has no token API: a browsing session is bootstrapped with a
//! handshake and then has to be kept alive. The [`SessionManager`] owns that
//! session as an explicit state machine:
//!
//! ```text
//! Unauthenticated -> Authenticating -> Active -> Expired -> Authenticating
//!                                  \-> Failed -> Authenticating
//! any state -> Unauthenticated (invalidate)
//! ```
//!
//! Expiry is detected reactively, either from the session's age or from the
//! upstream rejecting the token. Only one handshake runs at a time; callers
//! that need a session while one is in flight wait for it and reuse its
//! result.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::config::{Credential, PpubsConfig, RetrySettings};
use crate::sources::SourceError;
use crate::utils::{with_retry, RetryConfig};

/// What a successful handshake hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub token: String,
    /// ppubs "case" every search is filed under
    pub case_id: Option<String>,
}

/// Performs the login handshake against the upstream
#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    async fn handshake(&self) -> Result<SessionGrant, SourceError>;
}

/// An established session. Immutable once issued.
#[derive(Debug)]
pub struct Session {
    token: String,
    case_id: Option<String>,
    issued_at: Instant,
    ttl: Duration,
    generation: u64,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn case_id(&self) -> Option<&str> {
        self.case_id.as_deref()
    }

    /// Monotonic id distinguishing this session from the ones before it
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.age() >= self.ttl
    }

    /// Credential to attach to requests made under this session
    pub fn credential(&self) -> Credential {
        Credential::SessionToken(self.token.clone())
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Active,
    Expired,
    Failed,
}

#[derive(Debug)]
enum Slot {
    Unauthenticated,
    Authenticating,
    Active(Arc<Session>),
    Expired,
    Failed { reason: String, consecutive: u32 },
}

/// Leaves the slot Expired if a handshake is dropped before it settles
struct AbandonedHandshake<'a> {
    slot: &'a RwLock<Slot>,
}

impl Drop for AbandonedHandshake<'_> {
    fn drop(&mut self) {
        // A contended lock means someone else is already moving the state on
        if let Ok(mut slot) = self.slot.try_write() {
            if matches!(*slot, Slot::Authenticating) {
                tracing::debug!("ppubs handshake abandoned");
                *slot = Slot::Expired;
            }
        }
    }
}

/// Tunables for the session lifecycle
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub ttl: Duration,
    /// Backoff and attempt cap for one handshake
    pub handshake_retry: RetryConfig,
    /// Failed handshakes in a row before the manager resets itself
    pub max_consecutive_failures: u32,
}

impl SessionSettings {
    pub fn from_config(ppubs: &PpubsConfig, retry: &RetrySettings) -> Self {
        Self {
            ttl: ppubs.session_ttl(),
            handshake_retry: retry
                .retry_config()
                .max_attempts(ppubs.handshake_attempts),
            max_consecutive_failures: ppubs.max_consecutive_failures.max(1),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(25 * 60),
            handshake_retry: RetryConfig::default(),
            max_consecutive_failures: 3,
        }
    }
}

/// Owner of the single ppubs session
#[derive(Debug)]
pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    settings: SessionSettings,
    slot: RwLock<Slot>,
    handshake: Mutex<()>,
    generations: AtomicU64,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>, settings: SessionSettings) -> Self {
        Self {
            authenticator,
            settings,
            slot: RwLock::new(Slot::Unauthenticated),
            handshake: Mutex::new(()),
            generations: AtomicU64::new(0),
        }
    }

    /// Current state, with age-based expiry applied
    pub async fn state(&self) -> SessionState {
        match &*self.slot.read().await {
            Slot::Unauthenticated => SessionState::Unauthenticated,
            Slot::Authenticating => SessionState::Authenticating,
            Slot::Active(session) if session.is_expired() => SessionState::Expired,
            Slot::Active(_) => SessionState::Active,
            Slot::Expired => SessionState::Expired,
            Slot::Failed { .. } => SessionState::Failed,
        }
    }

    /// Run `f` with a valid session.
    ///
    /// If the upstream reports the session expired, the session is replaced
    /// and `f` runs exactly once more.
    pub async fn with_session<T, F, Fut>(&self, mut f: F) -> Result<T, SourceError>
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let session = self.acquire().await?;
        let generation = session.generation();

        match f(session).await {
            Err(SourceError::SessionExpired) => {
                tracing::info!(
                    "ppubs session #{} rejected upstream, re-authenticating",
                    generation
                );
                self.mark_expired(generation).await;

                let fresh = self.acquire().await?;
                match f(fresh).await {
                    Err(SourceError::SessionExpired) => Err(SourceError::Authentication(
                        "session rejected right after re-authentication".to_string(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Get an active session, running the handshake if needed
    pub async fn acquire(&self) -> Result<Arc<Session>, SourceError> {
        if let Some(session) = self.active().await {
            return Ok(session);
        }

        let _guard = self.handshake.lock().await;

        // Another caller may have finished a handshake while we waited
        if let Some(session) = self.active().await {
            return Ok(session);
        }

        self.authenticate().await
    }

    /// Mark the session with this generation expired.
    ///
    /// Stale reports about an already-replaced session are ignored.
    pub async fn mark_expired(&self, generation: u64) {
        let mut slot = self.slot.write().await;
        if let Slot::Active(session) = &*slot {
            if session.generation() == generation {
                tracing::debug!("ppubs session #{} marked expired", generation);
                *slot = Slot::Expired;
            }
        }
    }

    /// Drop the session; the next call starts from scratch
    pub async fn invalidate(&self) {
        *self.slot.write().await = Slot::Unauthenticated;
        tracing::info!("ppubs session invalidated");
    }

    async fn active(&self) -> Option<Arc<Session>> {
        match &*self.slot.read().await {
            Slot::Active(session) if !session.is_expired() => Some(Arc::clone(session)),
            _ => None,
        }
    }

    async fn authenticate(&self) -> Result<Arc<Session>, SourceError> {
        let previous_failures = {
            let mut slot = self.slot.write().await;
            let previous = match &*slot {
                Slot::Failed { consecutive, .. } => *consecutive,
                _ => 0,
            };
            *slot = Slot::Authenticating;
            previous
        };
        let _reset = AbandonedHandshake { slot: &self.slot };

        tracing::debug!("Starting ppubs handshake");
        let authenticator = Arc::clone(&self.authenticator);
        let outcome = with_retry(self.settings.handshake_retry, || {
            let authenticator = Arc::clone(&authenticator);
            async move { authenticator.handshake().await }
        })
        .await;

        match outcome {
            Ok(grant) => {
                let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                let session = Arc::new(Session {
                    token: grant.token,
                    case_id: grant.case_id,
                    issued_at: Instant::now(),
                    ttl: self.settings.ttl,
                    generation,
                });
                *self.slot.write().await = Slot::Active(Arc::clone(&session));
                tracing::info!("ppubs session #{} established", generation);
                Ok(session)
            }
            Err(error) => {
                let consecutive = previous_failures + 1;
                let reason = error.to_string();
                let mut slot = self.slot.write().await;
                if consecutive >= self.settings.max_consecutive_failures {
                    tracing::warn!(
                        "ppubs handshake failed {} times in a row, invalidating: {}",
                        consecutive,
                        reason
                    );
                    *slot = Slot::Unauthenticated;
                } else {
                    tracing::warn!("ppubs handshake failed: {}", reason);
                    *slot = Slot::Failed {
                        reason: reason.clone(),
                        consecutive,
                    };
                }
                Err(match error {
                    SourceError::Authentication(msg) => SourceError::Authentication(msg),
                    other => SourceError::Authentication(format!("handshake failed: {}", other)),
                })
            }
        }
    }

    /// Failure reason of the last handshake, while in the Failed state
    pub async fn last_failure(&self) -> Option<String> {
        match &*self.slot.read().await {
            Slot::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }
}
