//! Application context.
//!
//! Owns everything that used to be a process-wide singleton: the decay
//! configuration, the fallback flags, the review registry, the cost meter,
//! and the engines wired over one store and one classifier client.
//! Constructed at startup, dropped on shutdown; tests build a fresh one per
//! run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::budget::CostMeter;
use crate::config::{DecayConfig, Settings};
use crate::dissonance::{DissonanceEngine, ReviewLog};
use crate::fallback::{FallbackState, HealthMonitor};
use crate::llm::LlmClient;
use crate::reclassify::Reclassifier;
use crate::resolution::ResolutionEmitter;
use crate::smf::{NeutralityValidator, Smf};
use crate::store::Store;

/// The wired core
pub struct AppContext {
    pub settings: Settings,
    pub decay: DecayConfig,
    pub store: Arc<dyn Store>,
    pub llm: Arc<dyn LlmClient>,
    pub fallback: Arc<FallbackState>,
    pub reviews: Arc<ReviewLog>,
    pub meter: Arc<CostMeter>,
    pub emitter: Arc<ResolutionEmitter>,
    pub smf: Arc<Smf>,
    pub engine: Arc<DissonanceEngine>,
    pub reclassifier: Arc<Reclassifier>,
}

impl AppContext {
    /// Wire the core over a store backend and a classifier client.
    pub fn build<S>(settings: Settings, store: Arc<S>, llm: Arc<dyn LlmClient>) -> Self
    where
        S: Store + 'static,
    {
        let decay = settings.decay_config();
        let fallback = Arc::new(FallbackState::new());
        let reviews = Arc::new(ReviewLog::new());
        // Coerce from the concrete store per consumer
        let meter = Arc::new(CostMeter::new(store.clone(), &settings));
        let emitter = Arc::new(ResolutionEmitter::new(store.clone(), reviews.clone()));
        let smf = Arc::new(
            Smf::new(store.clone(), emitter.clone())
                .with_neutrality_validator(NeutralityValidator::new()),
        );
        let engine = Arc::new(DissonanceEngine::new(
            store.clone(),
            llm.clone(),
            fallback.clone(),
            reviews.clone(),
            meter.clone(),
        ));
        let reclassifier = Arc::new(Reclassifier::new(store.clone()));

        Self {
            settings,
            decay,
            store,
            llm,
            fallback,
            reviews,
            meter,
            emitter,
            smf,
            engine,
            reclassifier,
        }
    }

    /// Start the background health monitor; returns its join handle. The
    /// token stops the loop.
    pub fn spawn_health_monitor(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let monitor = HealthMonitor::new(self.fallback.clone(), self.llm.clone());
        tokio::spawn(monitor.run(cancel))
    }
}

// ============================================================================
// TESTS
// ============================================================================
