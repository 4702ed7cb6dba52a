//! `openagent config`: configuration management commands.

use openagent_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set OPENAI_API_KEY or api_key in config.toml)");
            }
            if config.commands.auto_approve {
                warnings.push("commands.auto_approve is on: every command runs without asking");
            }
            if !config.commands.allowlist_file.exists() {
                warnings.push("Allowlist file not found; only built-in entries apply");
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
            println!("   Endpoint:   {}", config.base_url);
            println!("   Model:      {}", config.model);
            println!(
                "   Compaction: {}",
                if config.history.compaction_enabled { "on" } else { "off" }
            );
            println!(
                "   Sub-agents: depth {}, {} passes (cap {})",
                config.virtual_agent.max_depth,
                config.virtual_agent.default_max_passes,
                config.virtual_agent.max_passes_cap
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let config_path = dir.join("config.toml");
    if config_path.exists() {
        println!("   Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("   ✅ Wrote {}", config_path.display());
    Ok(())
}
