//! Config command handlers

use anyhow::{Context, Result};

use taskline_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_url": config.api_url,
                    "token_set": config.token.is_some(),
                    "device_id": config.device_id,
                    "storage": config.storage,
                    "file_format": config.file_format,
                    "retry": config.retry,
                    "connect_timeout_secs": config.connect_timeout_secs,
                    "request_timeout_secs": config.request_timeout_secs,
                    "repair_on_load": config.repair_on_load
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:       {}", config.data_dir.display());
            println!("  api_url:        {}", config.api_url);
            println!(
                "  token:          {}",
                if config.token.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!(
                "  device_id:      {}",
                config.device_id.as_deref().unwrap_or("(not set)")
            );
            println!("  storage:        {}", config.storage);
            println!("  file_format:    {}", config.file_format.extension());
            println!(
                "  retry:          {}ms..{}ms x{} ({} attempts)",
                config.retry.min_delay_ms,
                config.retry.max_delay_ms,
                config.retry.factor,
                config.retry.max_attempts
            );
            println!("  repair_on_load: {}", config.repair_on_load);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;

    config.set(&key, &value)?;
    config.save().context("Failed to save configuration")?;

    let shown = if key == "token" { "(hidden)" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}
