// crates/detox-core/src/runtime/mod.rs
// ============================================================================
// Module: Detox Runtime
// Description: Request-time orchestration over a snapshot store.
// Purpose: Resolve cycles, ensure caches, and assemble reports.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! Request-time orchestration over a snapshot store.

pub mod reports;
pub mod resolve;

#[cfg(test)]
mod fixture;
