//! ProcGuard's core: the Lifecycle Engine, invariant battery, evidence
//! chain builder/verifier, filter audit chain, and resilience circuit.
//!
//! This crate has no knowledge of HTTP, Postgres, or any other collaborator
//! (§1 Non-goals) — it depends on [`repository::Repository`], a trait that
//! `procguard-store` implements. Everything that decides whether an action
//! is accepted or denied lives here and nowhere else.

pub mod circuit;
pub mod config;
pub mod engine;
pub mod enforcement;
pub mod error;
pub mod evidence;
pub mod filter_chain;
pub mod fsm;
pub mod invariants;
pub mod model;
pub mod repository;
pub mod role;

pub use engine::{ActionOutcome, ActionRequest, LifecycleEngine};
pub use error::ProcGuardError;
pub use fsm::BatchState;
pub use repository::{LedgerTransaction, Repository};
pub use role::{BatchEventType, Role};
