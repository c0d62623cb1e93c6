//! Arranger - multi-agent software engineering orchestrator core.
//!
//! Turns free-form user intent into an auditable pipeline of tasks:
//! - Workflow kernel: phase state machine with exit gates and scenario gating
//! - Plugin bus reacting to phase and task transitions
//! - Task scheduler with store-backed locks, retries, and timeouts
//! - Governance loop: votes, approvals, proofs, defects
//! - Per-agent LLM runtimes with self-governance watchers

pub mod domain;
pub mod infrastructure;
pub mod services;
