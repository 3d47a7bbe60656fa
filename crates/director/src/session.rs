//! Occupancy session lifecycle.
//!
//! A [`SessionGuard`] is the only way an Act holds an occupancy session. It
//! releases the session exactly once: explicitly through
//! [`SessionGuard::release`], or on drop with [`ReleaseReason::Dropped`] if
//! the owning task unwound first. Release failures are logged and ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::collaborators::{OccupancyRequest, ReleaseReason, SessionHandle, WorldActuator};
use crate::error::{Error, Result};

/// Exclusive holder of one occupancy session.
pub struct SessionGuard {
    world: Arc<dyn WorldActuator>,
    handle: Option<SessionHandle>,
    started: Instant,
    max_wall: Duration,
}

impl SessionGuard {
    /// Acquire a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] when the actuator refuses.
    pub fn acquire(
        world: Arc<dyn WorldActuator>,
        request: &OccupancyRequest,
        max_wall: Duration,
    ) -> Result<Self> {
        let handle = world.acquire_occupancy(request).ok_or_else(|| {
            Error::resource_unavailable(format!(
                "occupancy refused for {} participants",
                request.participants.len()
            ))
        })?;
        debug!(session = %handle, participants = request.participants.len(), "Session acquired");

        Ok(Self {
            world,
            handle: Some(handle),
            started: Instant::now(),
            max_wall,
        })
    }

    /// Time since acquisition.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the session may still be used.
    ///
    /// False once the wall-clock cap is exceeded or the actuator reports the
    /// session dead (e.g. its domain-time cap passed).
    #[must_use]
    pub fn is_alive(&self) -> bool {
        let Some(handle) = self.handle else {
            return false;
        };
        self.elapsed() < self.max_wall && self.world.is_alive(handle)
    }

    /// Release the session with an explicit reason.
    pub fn release(mut self, reason: ReleaseReason) {
        self.release_inner(reason);
    }

    fn release_inner(&mut self, reason: ReleaseReason) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match self.world.release_occupancy(handle, reason) {
            Ok(()) => debug!(session = %handle, reason = %reason, "Session released"),
            Err(e) => {
                warn!(session = %handle, reason = %reason, error = %e, "Session release failed");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("Session dropped without explicit release");
            self.release_inner(ReleaseReason::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryWorld;
    use crate::types::ParticipantId;

    fn occupancy() -> OccupancyRequest {
        OccupancyRequest {
            participants: vec![ParticipantId::new("pawn:1"), ParticipantId::new("pawn:2")],
            radius: 12.0,
            max_domain_hours: 2.0,
        }
    }

    #[tokio::test]
    async fn test_explicit_release_happens_once() {
        let world = Arc::new(InMemoryWorld::new());
        let guard = SessionGuard::acquire(world.clone(), &occupancy(), Duration::from_secs(60));
        assert!(guard.is_ok());

        if let Ok(guard) = guard {
            assert!(guard.is_alive());
            guard.release(ReleaseReason::Completed);
        }

        assert_eq!(world.release_reasons(), vec![ReleaseReason::Completed]);
    }

    #[tokio::test]
    async fn test_drop_releases_as_dropped() {
        let world = Arc::new(InMemoryWorld::new());
        {
            let _guard =
                SessionGuard::acquire(world.clone(), &occupancy(), Duration::from_secs(60));
        }
        assert_eq!(world.release_reasons(), vec![ReleaseReason::Dropped]);
    }

    #[tokio::test]
    async fn test_refused_acquisition() {
        let world = Arc::new(InMemoryWorld::new().refusing());
        let guard = SessionGuard::acquire(world.clone(), &occupancy(), Duration::from_secs(60));
        assert!(matches!(guard, Err(Error::ResourceUnavailable { .. })));
        assert_eq!(world.acquisition_count(), 0);
        assert!(world.release_reasons().is_empty());
    }

    #[tokio::test]
    async fn test_release_failure_is_swallowed() {
        let world = Arc::new(InMemoryWorld::new().failing_release());
        if let Ok(guard) =
            SessionGuard::acquire(world.clone(), &occupancy(), Duration::from_secs(60))
        {
            guard.release(ReleaseReason::Aborted);
        }
        assert_eq!(world.release_reasons(), vec![ReleaseReason::Aborted]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_cap_kills_session() {
        let world = Arc::new(InMemoryWorld::new());
        let guard =
            SessionGuard::acquire(world.clone(), &occupancy(), Duration::from_secs(5)).ok();
        assert!(guard.as_ref().is_some_and(SessionGuard::is_alive));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!guard.as_ref().is_some_and(SessionGuard::is_alive));
    }

    #[tokio::test]
    async fn test_actuator_reported_death() {
        let world = Arc::new(InMemoryWorld::new());
        let guard =
            SessionGuard::acquire(world.clone(), &occupancy(), Duration::from_secs(60)).ok();
        world.kill_sessions();
        assert!(!guard.as_ref().is_some_and(SessionGuard::is_alive));
    }
}
