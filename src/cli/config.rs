//! Conversion of command-line arguments into a `RemovalConfig`

use crate::cli::main_impl::Cli;
use crate::{
    config::{MattingConfig, RemovalConfig},
    models::ModelSpec,
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Model selected by `--model` and `--input-size`, `u2net` when absent
    pub(crate) fn model_spec(cli: &Cli) -> Result<ModelSpec> {
        let mut spec = match &cli.model {
            Some(model) => ModelSpec::parse(model).context("Invalid --model")?,
            None => ModelSpec::default(),
        };
        if let Some(size) = cli.input_size {
            anyhow::ensure!(size > 0, "--input-size must be greater than 0");
            spec.input_size = Some(size);
        }
        Ok(spec)
    }

    pub(crate) fn from_cli(cli: &Cli) -> Result<RemovalConfig> {
        let (backend_type, execution_provider) =
            ExecutionProviderManager::parse_provider_string(&cli.execution_provider)
                .context("Invalid execution provider format")?;

        let matting = MattingConfig {
            enabled: !cli.no_alpha_matting,
            foreground_threshold: cli.fg_threshold,
            background_threshold: cli.bg_threshold,
            erode_size: cli.erode_size,
        };

        RemovalConfig::builder()
            .model_spec(Self::model_spec(cli)?)
            .backend_type(backend_type)
            .execution_provider(execution_provider)
            .matting(matting)
            .post_process_mask(cli.post_process_mask)
            .max_dimension(cli.max_size)
            .png_compression(cli.compression)
            .num_threads(cli.threads)
            .build()
            .context("Invalid configuration")
    }
}
