//! Config load validation tests for detox-config.
// crates/detox-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding, parse).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::io::Write;
use std::path::Path;

use detox_config::ConfigError;
use detox_config::DetoxConfig;
use tempfile::NamedTempFile;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<DetoxConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config load".to_string()),
    }
}

fn write_config(content: &str) -> Result<NamedTempFile, String> {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(content.as_bytes()).map_err(|err| err.to_string())?;
    Ok(file)
}

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    let path = Path::new(&long_path);
    assert_invalid(DetoxConfig::load(Some(path)), "config path exceeds max length")?;
    Ok(())
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    let path = Path::new(&long_component);
    assert_invalid(DetoxConfig::load(Some(path)), "config path component too long")?;
    Ok(())
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'a'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(DetoxConfig::load(Some(file.path())), "config file exceeds size limit")?;
    Ok(())
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(DetoxConfig::load(Some(file.path())), "config file must be utf-8")?;
    Ok(())
}

#[test]
fn load_rejects_missing_file() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("absent.toml");
    assert_invalid(DetoxConfig::load(Some(&path)), "config io error")?;
    Ok(())
}

#[test]
fn load_rejects_unknown_keys() -> TestResult {
    let file = write_config("[server]\nbnd = \"127.0.0.1:8080\"\n")?;
    assert_invalid(DetoxConfig::load(Some(file.path())), "config parse error")?;
    Ok(())
}

#[test]
fn load_accepts_empty_file_with_defaults() -> TestResult {
    let file = write_config("")?;
    let config = DetoxConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config.server.bind != "127.0.0.1:8080" {
        return Err(format!("unexpected default bind {}", config.server.bind));
    }
    if config.report.default_partition_id != 10 {
        return Err("default partition should be 10".to_string());
    }
    if !config.server.audit.enabled {
        return Err("audit should default to enabled".to_string());
    }
    Ok(())
}

#[test]
fn load_reads_store_and_report_sections() -> TestResult {
    let file = write_config(
        "[store]\npath = \"var/detox.sqlite\"\njournal_mode = \"delete\"\nread_pool_size = 2\n\n\
         [report]\ndefault_partition_id = 3\noperation = \"deletion_test\"\n",
    )?;
    let config = DetoxConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    let sqlite = config.store.sqlite();
    if sqlite.read_pool_size != 2 || sqlite.path != Path::new("var/detox.sqlite") {
        return Err(format!("unexpected store config {sqlite:?}"));
    }
    let defaults = config.report.resolution_defaults().map_err(|err| err.to_string())?;
    if defaults.partition_id.get() != 3 {
        return Err("partition id not applied".to_string());
    }
    if defaults.operation != detox_core::CycleOperation::DeletionTest {
        return Err("operation not applied".to_string());
    }
    Ok(())
}
