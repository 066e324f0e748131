use mjlink_gateway::{channels, GatewayEvent};
use tracing::info;

/// Stay connected and log connection and account events until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let engine = super::connect().await?;
    let bus = engine.bus();

    for channel in [
        channels::OPENED,
        channels::CLOSED,
        channels::READY,
        channels::SETTINGS,
        channels::INFO,
        channels::PREFER_REMIX,
    ] {
        bus.on(channel, move |event: &GatewayEvent| match event {
            GatewayEvent::Opened { generation } => info!(generation, "Connection opened"),
            GatewayEvent::Closed { generation } => info!(generation, "Connection closed"),
            GatewayEvent::Settings(settings) => {
                info!(remix = settings.remix_enabled(), "Settings updated")
            }
            other => info!(channel, event = ?other, "Gateway event"),
        });
    }

    println!("Listening (remix {}). Press Ctrl-C to stop.", if engine.remix_enabled() { "on" } else { "off" });
    tokio::signal::ctrl_c().await?;
    engine.close().await;
    println!("Closed.");
    Ok(())
}
