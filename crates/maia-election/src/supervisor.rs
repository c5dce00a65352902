//! Monitors leader liveness and triggers failover.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::FailoverError;
use crate::state::{ElectionState, NodeRole};

const EVENT_HISTORY_CAPACITY: usize = 100;

/// One completed or attempted failover, kept for operator audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub timestamp: DateTime<Utc>,
    pub old_leader_id: Option<String>,
    pub new_leader_id: Option<String>,
    pub reason: String,
    pub term: u64,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Monitors local election state and initiates failover on leader timeout,
/// subject to an inhibit window that prevents flapping.
pub struct FailoverSupervisor {
    election: Arc<RwLock<ElectionState>>,
    leader_timeout: Duration,
    inhibit_window: Duration,
    in_progress: AtomicBool,
    last_failover: Mutex<Option<Instant>>,
    events: Mutex<VecDeque<FailoverEvent>>,
}

impl FailoverSupervisor {
    pub fn new(
        election: Arc<RwLock<ElectionState>>,
        leader_timeout: Duration,
        inhibit_window: Duration,
    ) -> Self {
        Self {
            election,
            leader_timeout,
            inhibit_window,
            in_progress: AtomicBool::new(false),
            last_failover: Mutex::new(None),
            events: Mutex::new(VecDeque::with_capacity(EVENT_HISTORY_CAPACITY)),
        }
    }

    /// Default inhibit window per the replication spec: 60 seconds.
    pub fn default_inhibit_window() -> Duration {
        Duration::from_secs(60)
    }

    /// One health check tick: acts only when this node is currently a
    /// follower and the leader has been silent longer than `leader_timeout`.
    pub async fn tick(&self) {
        let is_stale = {
            let election = self.election.read().await;
            election.role() == NodeRole::Follower
                && election.elapsed_since_activity() >= self.leader_timeout
        };
        if is_stale {
            match self.trigger_failover("leader timeout").await {
                Ok(event) => info!(?event, "failover tick triggered failover"),
                Err(FailoverError::Inhibited) => {}
                Err(e) => warn!(error = %e, "failover tick failed"),
            }
        }
    }

    /// Manually trigger a failover, subject to the same guards as the
    /// automatic tick.
    pub async fn trigger_failover(&self, reason: &str) -> Result<FailoverEvent, FailoverError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FailoverError::InProgress);
        }
        let result = self.do_trigger(reason).await;
        self.in_progress.store(false, Ordering::Release);
        result
    }

    async fn do_trigger(&self, reason: &str) -> Result<FailoverEvent, FailoverError> {
        {
            let last = self.last_failover.lock().await;
            if let Some(last) = *last {
                if last.elapsed() < self.inhibit_window {
                    return Err(FailoverError::Inhibited);
                }
            }
        }

        let started = Instant::now();
        let old_leader_id = { self.election.read().await.leader_id().map(str::to_string) };

        let (new_leader_id, term) = {
            let mut election = self.election.write().await;
            election.force_leadership();
            (election.leader_id().map(str::to_string), election.term())
        };

        *self.last_failover.lock().await = Some(Instant::now());

        let event = FailoverEvent {
            timestamp: Utc::now(),
            old_leader_id,
            new_leader_id,
            reason: reason.to_string(),
            term,
            success: true,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.record(event.clone()).await;
        Ok(event)
    }

    async fn record(&self, event: FailoverEvent) {
        let mut events = self.events.lock().await;
        if events.len() >= EVENT_HISTORY_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of the failover history, oldest first, capped at 100.
    pub async fn history(&self) -> Vec<FailoverEvent> {
        self.events.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(inhibit: Duration) -> FailoverSupervisor {
        let election = Arc::new(RwLock::new(ElectionState::new("n1", 1)));
        FailoverSupervisor::new(election, Duration::from_millis(10), inhibit)
    }

    #[tokio::test]
    async fn trigger_succeeds_then_inhibits_then_succeeds_again() {
        let sup = supervisor(Duration::from_millis(50));

        let first = sup.trigger_failover("test").await.unwrap();
        assert!(first.success);

        let second = sup.trigger_failover("test").await;
        assert!(matches!(second, Err(FailoverError::Inhibited)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let third = sup.trigger_failover("test").await.unwrap();
        assert!(third.success);
        assert!(third.term > first.term);
    }

    #[tokio::test]
    async fn history_is_capped_at_100() {
        let sup = supervisor(Duration::from_millis(0));
        for _ in 0..150 {
            let _ = sup.trigger_failover("test").await;
        }
        assert_eq!(sup.history().await.len(), 100);
    }
}
