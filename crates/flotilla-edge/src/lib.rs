//! Flotilla Edge - Edge stack deployment and fleet-status reconciliation
//!
//! This crate provides:
//! - Edge group membership resolution (static lists and tag selectors)
//! - Endpoint relations and derived stack deployment counters
//! - The edge stack lifecycle (build, persist, update, redeploy, delete)
//! - Agent status reporting with version gating and deduplication
//! - The fleet status summarizer
//! - `EdgeEngine`, the transactional facade over all of the above

pub mod cache;
pub mod config;
pub mod engine;
pub mod environment;
pub mod group;
pub mod lifecycle;
pub mod manifest;
pub mod membership;
pub mod model;
pub mod relation;
pub mod report;
pub mod stack_store;
pub mod status;
pub mod summary;

// Re-export the engine surface
pub use engine::{CreateStackRequest, EdgeEngine, EdgeEngineBuilder, EdgeStackView};
pub use environment::{RegisterEnvironmentRequest, UpdateEnvironmentRequest};
pub use group::{CreateEdgeGroupRequest, UpdateEdgeGroupRequest};
pub use lifecycle::UpdateStackRequest;
pub use report::{AgentAuthorizer, EdgeIdAuthorizer, ReportOutcome, StatusReport};

// Re-export shipped collaborators
pub use cache::{MokaRelationCache, NoopRelationCache, RelationCache};
pub use manifest::FsManifestStorage;

pub use config::EngineConfig;
pub use model::*;
pub use summary::{FleetSummary, FleetVerdict, summarize};
