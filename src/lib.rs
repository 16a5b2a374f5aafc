//! Lease-document composition engine.
//!
//! A clause library holds versioned, reusable legal text fragments;
//! templates compose them into ordered, conditional bindings; the generator
//! resolves a template plus variable values into an immutable lease
//! document. Persistence is injected through the store traits — the engine
//! itself holds no global state.

pub mod composer;
pub mod condition;
pub mod config;
pub mod error;
pub mod generator;
pub mod interpolate;
pub mod library;
pub mod store;
pub mod types;

pub use composer::{AttachOptions, TemplateComposer, TemplatePatch, TemplateSpec};
pub use condition::{evaluate, evaluate_all};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use generator::DocumentGenerator;
pub use interpolate::interpolate;
pub use library::{ClauseFilter, ClauseLibrary, ClausePatch, ClauseSpec};
pub use store::{
    ClauseStore, LeaseStore, MemoryClauseStore, MemoryLeaseStore, MemoryTemplateStore,
    StaleRevision, TemplateStore,
};
pub use types::{
    Clause, ClauseRequirement, Condition, ConditionOperator, GeneratedClause, GeneratedLease,
    LeaseStatus, Template, TemplateClauseBinding, TemplateStatus, TemplateVariable, VariableMap,
    VariableType, VariableValue,
};
