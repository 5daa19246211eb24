//! Degraded-mode state and health recovery.
//!
//! Each external service carries an in-memory fallback flag. Retry
//! exhaustion activates it; a successful health probe deactivates it. The
//! probe loop wakes every 15 minutes, pings only services whose flag is
//! active, and never lets an error escape the loop.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, LlmClient};

/// Service name for the dissonance classification model
pub const CLASSIFICATION_SERVICE: &str = "dissonance_classification";

/// Probe cadence
pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(900);

/// Hard timeout for one probe call
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// FALLBACK STATE
// ============================================================================

/// Mutex-guarded per-service fallback flags
#[derive(Default)]
pub struct FallbackState {
    active: Mutex<HashMap<String, bool>>,
}

impl FallbackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a service into degraded mode.
    pub fn activate(&self, service: &str) {
        let mut active = self.active.lock().unwrap();
        let was_active = active.insert(service.to_string(), true).unwrap_or(false);
        if !was_active {
            warn!(service, "fallback activated");
        }
    }

    /// Restore a service to normal operation.
    pub fn deactivate(&self, service: &str) {
        let mut active = self.active.lock().unwrap();
        if active.insert(service.to_string(), false).unwrap_or(false) {
            info!(service, "fallback deactivated, service recovered");
        }
    }

    pub fn is_active(&self, service: &str) -> bool {
        self.active
            .lock()
            .unwrap()
            .get(service)
            .copied()
            .unwrap_or(false)
    }

    /// Services currently in degraded mode.
    pub fn active_services(&self) -> Vec<String> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, active)| **active)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ============================================================================
// HEALTH MONITOR
// ============================================================================

/// Background probe loop for services in degraded mode.
pub struct HealthMonitor {
    state: std::sync::Arc<FallbackState>,
    client: std::sync::Arc<dyn LlmClient>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        state: std::sync::Arc<FallbackState>,
        client: std::sync::Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            state,
            client,
            interval: HEALTH_CHECK_INTERVAL,
            probe_timeout: HEALTH_CHECK_TIMEOUT,
        }
    }

    /// Override cadence and probe timeout (tests).
    pub fn with_timing(mut self, interval: Duration, probe_timeout: Duration) -> Self {
        self.interval = interval;
        self.probe_timeout = probe_timeout;
        self
    }

    /// Run until cancelled. Sleeps first so startup is never blocked on a
    /// probe; one tick checks every active service. Probe failures are
    /// logged and the flag stays on.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "health monitor started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("health monitor stopped");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            for service in self.state.active_services() {
                if cancel.is_cancelled() {
                    return;
                }
                self.probe(&service).await;
            }
        }
    }

    async fn probe(&self, service: &str) {
        debug!(service, "fallback active, probing service");
        let ping = self.client.complete(CompletionRequest::ping());
        match tokio::time::timeout(self.probe_timeout, ping).await {
            Ok(Ok(_)) => {
                self.state.deactivate(service);
            }
            Ok(Err(e)) => {
                warn!(service, error = %e, "health probe failed, staying in fallback");
            }
            Err(_) => {
                warn!(
                    service,
                    timeout_secs = self.probe_timeout.as_secs(),
                    "health probe timed out, staying in fallback"
                );
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
