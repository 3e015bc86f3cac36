use anyhow::Context;

use tessera_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tessera_observability::init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tessera_api::server::run(config).await
}
