use glow_dcc_bridge::{Config, GlowmarktApi, MemoryStatisticsStore, SensorCoordinator};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Hildebrand Glow (DCC) bridge");
    let config = Config::from_env()?;

    let api = GlowmarktApi::authenticate(&config).await?;
    info!("Authenticated against {}", api.url());

    let (update_sender, mut updates) = mpsc::channel(32);
    let _coordinator = SensorCoordinator::start(
        api,
        &config,
        MemoryStatisticsStore::shared(),
        update_sender,
    )
    .await;

    while let Some(update) = updates.recv().await {
        info!(
            "{} ({}): {} {}",
            update.name, update.unique_id, update.value, update.unit
        );
    }

    Ok(())
}
