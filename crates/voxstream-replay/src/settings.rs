//! Layered configuration: TOML file, then `VOXSTREAM_*` environment, then
//! command line flags.

use config::{Config, Environment, File};
use std::path::Path;
use voxstream_core::StreamConfig;

/// Flag values that override file and environment settings
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub sample_rate: Option<u32>,
    pub encoding: Option<String>,
    pub preload_buffers: Option<usize>,
    pub chunk_timeout_ms: Option<u64>,
}

pub fn load(file: Option<&Path>, overrides: &Overrides) -> anyhow::Result<StreamConfig> {
    let mut builder = Config::builder();
    if let Some(path) = file {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder
        .add_source(Environment::with_prefix("VOXSTREAM").try_parsing(true))
        .set_override_option("sample_rate", overrides.sample_rate.map(i64::from))?
        .set_override_option("encoding", overrides.encoding.clone())?
        .set_override_option(
            "preload_buffers",
            overrides.preload_buffers.map(|n| n as i64),
        )?
        .set_override_option(
            "chunk_timeout_ms",
            overrides.chunk_timeout_ms.map(|ms| ms as i64),
        )?;

    let config: StreamConfig = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
