//! Canonical example tests for detox-config.
// crates/detox-config/tests/config_example.rs
// =============================================================================
// Module: Config Example Tests
// Description: Validate the canonical example configuration.
// Purpose: Keep the published example loadable.
// =============================================================================

use detox_config::DetoxConfig;
use detox_config::config_toml_example;

#[test]
fn canonical_example_parses_and_validates() -> Result<(), String> {
    let config =
        DetoxConfig::from_toml_str(&config_toml_example()).map_err(|err| err.to_string())?;
    if config.store.read_pool_size != 4 {
        return Err("example read_pool_size drifted".to_string());
    }
    Ok(())
}
