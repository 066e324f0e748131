use mjlink_core::{Config, Paths};
use serde_json::Value;

fn redact(value: &mut Value, key: &str) {
    if let Some(secret) = value.get_mut(key) {
        if secret.as_str().map_or(false, |s| !s.is_empty()) {
            *secret = Value::String("***".to_string());
        }
    }
}

/// Show the current configuration as pretty-printed JSON, with secrets masked.
pub async fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let mut json = serde_json::to_value(&config)?;
    if let Some(discord) = json.get_mut("discord") {
        redact(discord, "salaiToken");
    }
    if let Some(verification) = json.get_mut("verification") {
        redact(verification, "huggingFaceToken");
    }

    println!();
    println!("📋 Current Configuration");
    println!("  File: {}", paths.config_file().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    if let Err(e) = config.validate() {
        println!();
        println!("⚠️  {}", e);
    }
    Ok(())
}

pub async fn init(force: bool) -> anyhow::Result<()> {
    let path = Paths::new().config_file();
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(&path)?;
    println!("✅ Wrote {}", path.display());
    Ok(())
}
