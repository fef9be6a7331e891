use anyhow::{Context, Result};
use repairbot_core::RepairBotConfig;
use std::path::PathBuf;
use tracing::info;

use crate::cli::app::InitArgs;

pub fn execute(config_path: Option<&PathBuf>, args: InitArgs) -> Result<()> {
    let path = match config_path {
        Some(path) => path.clone(),
        None => RepairBotConfig::default_path()
            .context("Could not determine a configuration directory; pass --config")?,
    };

    if path.exists() && !args.force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let config = RepairBotConfig::default();
    config.save(&path).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());

    println!("Configuration written to {}", path.display());
    println!(
        "Set {} (and {} for the claude engine) before scanning.",
        config.engines.groq.api_key_env, config.engines.claude.api_key_env
    );
    println!("Data directory: {}", config.storage.data_dir.display());
    Ok(())
}
