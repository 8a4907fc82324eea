//! RAII guard for a universe update lock.
//!
//! Release is async, so the happy path calls [`UniverseLockGuard::release`]
//! explicitly. A guard dropped while still holding its token (a panic
//! unwinding past it, or the owning future being cancelled) spawns the
//! release on the current runtime instead.

use tracing::{debug, error, warn};

use crate::error::Result;
use crate::lock::{ExclusiveLock, LockToken};

pub struct UniverseLockGuard {
    lock: ExclusiveLock,
    token: Option<LockToken>,
}

impl UniverseLockGuard {
    pub fn new(lock: ExclusiveLock, token: LockToken) -> Self {
        debug!(
            universe_uuid = %token.universe_uuid(),
            task_uuid = %token.task_uuid(),
            "Lock guard created"
        );
        Self {
            lock,
            token: Some(token),
        }
    }

    /// The held token, `None` once released.
    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    /// Release the lock now. Calling it again after success is a no-op.
    ///
    /// On error the token is kept, so a later call (or drop) retries.
    pub async fn release(&mut self) -> Result<Option<i64>> {
        let Some(token) = self.token.take() else {
            return Ok(None);
        };
        match self.lock.release(&token).await {
            Ok(version) => Ok(version),
            Err(e) => {
                self.token = Some(token);
                Err(e)
            }
        }
    }
}

impl Drop for UniverseLockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        warn!(
            universe_uuid = %token.universe_uuid(),
            task_uuid = %token.task_uuid(),
            "Lock guard dropped while held, releasing in background"
        );

        // Cannot await in Drop
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = self.lock.clone();
                handle.spawn(async move {
                    if let Err(e) = lock.release(&token).await {
                        error!(
                            universe_uuid = %token.universe_uuid(),
                            error = %e,
                            "Background lock release failed"
                        );
                    }
                });
            }
            Err(_) => {
                error!(
                    universe_uuid = %token.universe_uuid(),
                    task_uuid = %token.task_uuid(),
                    "No runtime to release lock on drop; use force release"
                );
            }
        }
    }
}
