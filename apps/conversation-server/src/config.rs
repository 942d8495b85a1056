//! CLI-facing configuration loading.
//!
//! Layers command-line overrides on top of `asp_core::Config`'s own
//! YAML-file-plus-environment-variable loading, mirroring the way the
//! desktop app's CLI overrides its own config struct.

use std::path::Path;

use anyhow::{Context, Result};

/// Loads the deployment config, then applies CLI overrides that take
/// precedence over both the YAML file and environment variables.
pub fn load_config(path: Option<&Path>, listen_port: Option<u16>) -> Result<asp_core::Config> {
    let mut config = asp_core::Config::load(path).context("failed to load configuration")?;

    if let Some(port) = listen_port {
        config.listen_port = port;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}
