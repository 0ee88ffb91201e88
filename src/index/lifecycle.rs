//! Index lifecycle
//!
//! ```text
//! Stopped -> Initialized (backend ready, journal directory prepared)
//!         -> Running (leftover segments replayed, active segment open,
//!                     checkpoint scheduler started)
//!         -> Stopped (scheduler stopped, journal closed)
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::backend::SearchBackend;
use crate::config::IndexConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Stopped,
    Initialized,
    Running,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexState::Stopped => "stopped",
            IndexState::Initialized => "initialized",
            IndexState::Running => "running",
        };
        f.write_str(name)
    }
}

/// Delay before readiness attempt `attempt` (1-based): exponential from
/// the initial backoff, capped, plus up to 25% jitter.
pub(crate) fn readiness_backoff(config: &IndexConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let base = config
        .readiness_initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.readiness_max_backoff_ms);
    let jitter = if base >= 4 {
        rand::thread_rng().gen_range(0..=base / 4)
    } else {
        0
    };
    Duration::from_millis(base + jitter)
}

/// Pings the backend until it reports ready. Never gives up.
pub(crate) async fn wait_for_backend(backend: &dyn SearchBackend, config: &IndexConfig) {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let reason = match backend.ping().await {
            Ok(status) if status.ready => {
                info!(event = "BACKEND_READY", attempts = attempt);
                return;
            }
            Ok(_) => "collection not ready".to_string(),
            Err(e) => e.to_string(),
        };

        if config.readiness_warn_every > 0 && attempt % config.readiness_warn_every == 0 {
            warn!(event = "BACKEND_NOT_READY", attempts = attempt, reason = %reason);
        } else {
            debug!(event = "BACKEND_NOT_READY", attempts = attempt, reason = %reason);
        }

        tokio::time::sleep(readiness_backoff(config, attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    fn config() -> IndexConfig {
        IndexConfig {
            readiness_initial_backoff_ms: 100,
            readiness_max_backoff_ms: 1000,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = config();
        let first = readiness_backoff(&config, 1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));

        let third = readiness_backoff(&config, 3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));

        let late = readiness_backoff(&config, 40);
        assert!(late >= Duration::from_millis(1000) && late <= Duration::from_millis(1250));
    }

    #[tokio::test]
    async fn test_waits_until_backend_available() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_available(false);

        let config = IndexConfig {
            readiness_initial_backoff_ms: 5,
            readiness_max_backoff_ms: 20,
            ..IndexConfig::default()
        };

        let flipper = {
            let backend = backend.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                backend.set_available(true);
            })
        };

        tokio::time::timeout(Duration::from_secs(5), wait_for_backend(backend.as_ref(), &config))
            .await
            .unwrap();
        flipper.await.unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(IndexState::Running.to_string(), "running");
    }
}
