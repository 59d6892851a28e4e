// crates/detox-core/src/core/mod.rs
// ============================================================================
// Module: Detox Core Model
// Description: Identifiers, domain records, and pure report builders.
// Purpose: Group the backend-free parts of Detox.
// Dependencies: serde, thiserror, time
// ============================================================================

//! Identifiers, domain records, and pure report builders.

pub mod facts;
pub mod identifiers;
pub mod inventory;
pub mod model;
pub mod pattern;
pub mod report;
