use std::sync::Arc;

use energywise_lib::config::AppConfig;
use energywise_lib::context::AppContext;
use energywise_lib::{api, logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing("info");

    let config = AppConfig::from_env()?;
    info!(settings = ?config.redacted(), "starting EnergyWise");

    let ctx = AppContext::initialize(config).await?;
    api::serve(Arc::new(ctx)).await
}
