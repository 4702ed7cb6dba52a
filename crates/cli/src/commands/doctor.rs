//! `openagent doctor`: diagnose setup problems.

use openagent_agent::prompt::find_guidance_files;
use openagent_config::AppConfig;
use openagent_security::CommandAllowlist;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 OpenAgent Doctor");
    println!("===================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file, using defaults (run `openagent config init`)");
    }

    match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");

            if config.has_api_key() {
                println!("  ✅ API key configured");
            } else {
                println!("  ❌ No API key: set OPENAI_API_KEY or api_key in config.toml");
                issues += 1;
            }

            match CommandAllowlist::load(&config.commands.allowlist_file) {
                Ok(list) => println!(
                    "  ✅ Allowlist file loaded ({} entries)",
                    list.entries().len()
                ),
                Err(e) => println!("  ⚠️  Allowlist file not used: {e}"),
            }
        }
        Err(e) => {
            println!("  ❌ Config file invalid: {e}");
            issues += 1;
        }
    }

    if shell_available("sh") || cfg!(target_os = "windows") {
        println!("  ✅ Shell available");
    } else {
        println!("  ❌ No `sh` found on PATH; commands cannot run");
        issues += 1;
    }

    let cwd = std::env::current_dir()?;
    let guidance = find_guidance_files(&cwd);
    println!("  ✅ {} AGENTS.md file(s) found under {}", guidance.len(), cwd.display());

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

fn shell_available(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}
