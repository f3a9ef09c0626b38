//! `thinkloop init`: write a default configuration file.

use thinkloop_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("thinkloop setup");
    println!("===============\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("  Config already exists: {}", config_path.display());
        println!("  Delete it first to regenerate the defaults.");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Wrote {}", config_path.display());
    }

    println!();
    println!("Next steps:");
    println!("  1. Set an API key: export OPENAI_API_KEY=sk-...");
    println!("     (or THINKLOOP_API_KEY / OPENROUTER_API_KEY)");
    println!("  2. Try it:         thinkloop run \"List the files in this directory\"");
    println!("  3. Chat:           thinkloop chat");
    Ok(())
}
