//! Server and section validation tests for detox-config.
// crates/detox-config/tests/server_validation.rs
// =============================================================================
// Module: Config Section Validation Tests
// Description: Validate bind, body limit, store, and report constraints.
// Purpose: Ensure server settings fail closed and enforce limits.
// =============================================================================

use detox_config::ConfigError;
use detox_config::DetoxConfig;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

#[test]
fn default_config_is_valid() -> TestResult {
    DetoxConfig::default().validate().map_err(|err| err.to_string())
}

#[test]
fn bind_must_parse() -> TestResult {
    let mut config = DetoxConfig::default();
    config.server.bind = "localhost-ish".to_string();
    assert_invalid(config.validate(), "invalid bind address")?;
    config.server.bind = "   ".to_string();
    assert_invalid(config.validate(), "server.bind must be non-empty")?;
    Ok(())
}

#[test]
fn non_loopback_bind_requires_opt_in() -> TestResult {
    let mut config = DetoxConfig::default();
    config.server.bind = "0.0.0.0:8080".to_string();
    assert_invalid(config.validate(), "non-loopback bind disallowed")?;
    config.server.allow_non_loopback = true;
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn max_body_bytes_is_bounded() -> TestResult {
    let mut config = DetoxConfig::default();
    config.server.max_body_bytes = 0;
    assert_invalid(config.validate(), "max_body_bytes must be greater than zero")?;
    config.server.max_body_bytes = 64 * 1024 * 1024;
    assert_invalid(config.validate(), "max_body_bytes exceeds limit")?;
    Ok(())
}

#[test]
fn audit_path_must_be_non_empty() -> TestResult {
    let mut config = DetoxConfig::default();
    config.server.audit.path = Some(" ".to_string());
    assert_invalid(config.validate(), "server.audit.path must be non-empty")?;
    Ok(())
}

#[test]
fn store_read_pool_is_bounded() -> TestResult {
    let mut config = DetoxConfig::default();
    config.store.read_pool_size = 0;
    assert_invalid(config.validate(), "store.read_pool_size must be greater than zero")?;
    config.store.read_pool_size = 1_000;
    assert_invalid(config.validate(), "store.read_pool_size exceeds limit")?;
    Ok(())
}

#[test]
fn default_partition_must_be_nonzero() -> TestResult {
    let mut config = DetoxConfig::default();
    config.report.default_partition_id = 0;
    assert_invalid(config.validate(), "report.default_partition_id must be greater than zero")?;
    Ok(())
}
