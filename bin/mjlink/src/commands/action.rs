use std::sync::Arc;

use mjlink_gateway::{ProgressCallback, ProgressSnapshot};

/// Dispatch one component click and print progress until the final image.
pub async fn run(
    message_id: &str,
    custom_id: &str,
    flags: u64,
    prompt: Option<String>,
) -> anyhow::Result<()> {
    let engine = super::connect().await?;

    let progress: ProgressCallback = Arc::new(|snapshot: &ProgressSnapshot| {
        match snapshot.message.as_ref().filter(|m| !m.uri.is_empty()) {
            Some(msg) => println!("  ⏳ {} {}", snapshot.stage, msg.uri),
            None => println!("  ⏳ {}", snapshot.stage),
        }
    });

    let result = engine
        .action(message_id, custom_id, flags, prompt, Some(progress))
        .await;
    engine.close().await;

    let msg = result?;
    println!();
    println!("✅ Done");
    println!("{}", serde_json::to_string_pretty(&msg)?);
    Ok(())
}
