//! # Ethos Core
//!
//! Belief-revision core for a cognitive knowledge graph whose edges encode
//! beliefs, experiences, and capabilities of an agent:
//!
//! - **Dissonance Engine**: pairs edges in a node's neighborhood and
//!   classifies each pair as EVOLUTION / CONTRADICTION / NUANCE / NONE
//!   under an AGM-inspired entrenchment discipline
//! - **Self-Modification Framework**: proposal/approval/undo state machine
//!   gating every structural change, with immutable safeguards, bilateral
//!   consent for identity-defining edges, and neutral proposal framing
//! - **Memory Decay**: sector-parameterized exponential relevance scoring
//!   (emotional, episodic, semantic, procedural, reflective)
//! - **Resolution Hyperedges**: dissonances resolve into hyperedges over
//!   the original edges; originals are tombstoned, never deleted
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ethos_core::{AppContext, EdgeScope, ProjectScope, Settings};
//!
//! let settings = Settings::load(Path::new("config/settings.yaml"));
//! let store = Arc::new(PgStore::connect(&database_url, 16).await?);
//! let llm = Arc::new(AnthropicClient::new(&settings, "haiku_classify", store.clone(), meter)?);
//! let ctx = AppContext::build(settings, store, llm);
//!
//! let scope = ProjectScope::new("ethr_memory");
//! let result = ctx.engine.check(&scope, "I/O", EdgeScope::Recent, &cancel).await?;
//! ```
//!
//! All mutating paths go through the SMF; neighborhood reads filter
//! superseded edges and annotate every edge with its decay-adjusted
//! relevance.

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod audit;
pub mod budget;
pub mod config;
pub mod context;
pub mod dissonance;
pub mod error;
pub mod fallback;
pub mod graph;
pub mod llm;
pub mod reclassify;
pub mod relevance;
pub mod resolution;
pub mod retry;
pub mod sector;
pub mod smf;
pub mod store;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{CoreError, ErrorCode, ErrorDetail, Result, StoreError};

// Sectors and decay
pub use config::{CostRate, DecayConfig, SectorDecay, Settings};
pub use relevance::relevance_score;
pub use sector::{ALL_SECTORS, MemorySector, classify_memory_sector};

// Graph model
pub use graph::{
    Direction, Edge, EdgeKind, EdgeScope, Insight, InsightPatch, Neighbor, NeighborQuery, NewEdge,
    Node, Properties,
};

// Store boundary
pub use store::{
    AuditSink, CostLog, GraphStore, InsightStore, MemoryStore, PgStore, ProjectScope,
    ProposalStore, RetryLog, Store,
};

// Retry and LLM clients
pub use llm::{AnthropicClient, Completion, CompletionRequest, LlmClient, LlmError};
pub use retry::{RetryClass, RetryLogEntry, RetryPolicy, call_with_retry};

// Dissonance engine
pub use dissonance::{
    AuthoritativeSource, CheckStatus, DissonanceCheckResult, DissonanceEngine, DissonanceResult,
    DissonanceType, MAX_PAIRS, NuanceReview, ResolutionType, ReviewLog, ReviewStatus,
};

// SMF
pub use smf::{
    Actor, ApprovalLevel, ApproveOutcome, BulkApproveFilter, BulkApproveReport, IMMUTABLE_SAFEGUARDS,
    NeutralReasoning, Proposal, ProposalDraft, ProposalStatus, ProposedAction, RejectActor, Smf,
    TriggerType, generate_neutral_reasoning,
};

// Resolutions and reclassification
pub use reclassify::{ReclassifyOutcome, ReclassifyParams, Reclassifier};
pub use resolution::{ResolutionEmitter, ResolutionOutcome, ResolutionRequest, filter_superseded};

// Fallback and health
pub use fallback::{CLASSIFICATION_SERVICE, FallbackState, HealthMonitor};

// Observability
pub use audit::{AuditAction, AuditEntry};
pub use budget::{BudgetAlert, BudgetStatus, CostEntry, CostMeter, CostProjection};

// Application context
pub use context::AppContext;

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
