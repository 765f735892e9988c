//! `advisor onboard`: First-time setup.

use advisor_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    println!("🔬 Advisor First-Time Setup");
    println!("=============================\n");

    if let Some(dir) = config_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created config directory: {}", dir.display());
        }
    }

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete it and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
    }

    let config = AppConfig::load_from(&config_path)?;
    let data_dir = config.data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        println!("✅ Created data directory: {}", data_dir.display());
    }

    println!("\n📝 Next steps:");
    println!("   1. Register your customers and projects under [customers.projects]");
    println!("   2. Set ADVISOR_API_KEY, or point [generation] at a local Ollama");
    println!("   3. Run: advisor ingest --customer <id> --project <id> --file notes.txt");
    println!("   4. Run: advisor query \"What did the customer ask for?\"\n");

    Ok(())
}
