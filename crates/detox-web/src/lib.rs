// crates/detox-web/src/lib.rs
// ============================================================================
// Module: Detox Web Library
// Description: HTTP dispatcher for the Detox monitor.
// Purpose: Expose report endpoints, the HTML shell, and audit sinks.
// Dependencies: axum, detox-core, detox-config, detox-store-sqlite
// ============================================================================

//! ## Overview
//! Every request to `/detox` is parsed into a [`DetoxAction`], resolved to a
//! cycle against the snapshot store, and answered from the cycle's snapshot
//! cache. Requests are independent: no state survives between them other
//! than what the store holds. Security posture: request parameters are
//! untrusted and validated before any store access; authentication is left
//! to a fronting proxy.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod page;
pub mod request;
pub mod server;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditEventParams;
pub use audit::AuditOutcome;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use audit::audit_sink_from_config;
pub use page::PageTemplate;
pub use request::DataType;
pub use request::DetoxAction;
pub use request::RequestError;
pub use request::RequestParams;
pub use server::DetoxServer;
pub use server::ServerError;
pub use server::ServerState;
pub use server::dispatch;
pub use server::health;
pub use server::router;
