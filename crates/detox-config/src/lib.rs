// crates/detox-config/src/lib.rs
// ============================================================================
// Module: Detox Config Library
// Description: Canonical config model, validation, and example generation.
// Purpose: Single source of truth for detox.toml semantics.
// Dependencies: detox-core, detox-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `detox-config` defines the configuration model for the Detox monitor
//! server and CLI. Loading is strict: path, size, and encoding guards run
//! before parsing, and every section validates before the config is handed
//! out.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
