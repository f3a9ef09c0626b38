//! `thinkloop config`: Configuration management commands.

use thinkloop_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set OPENAI_API_KEY or THINKLOOP_API_KEY env var)".to_string());
            }
            for definition in config.agent_definitions() {
                if let Err(e) = definition.to_capabilities(&config) {
                    warnings.push(format!("Agent '{}': {e}", definition.name));
                }
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Endpoint:  {}", config.base_url);
            println!("   Model:     {}", config.default_model);
            println!("   Retries:   {}", config.retry.max_retries);
            println!("   Workspace: {}", config.tools.resolved_workspace().display());
            println!("   Agents:    {}", config.agent_definitions().len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = redacted(super::load_config()?);
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some("********".into());
    }
    config
}
