mod callback;
mod config;
mod db;
mod flows;
mod tg;
mod view;

use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Arc::new(config::Config::from_env()?);

    let db = db::Db::connect(&cfg.database_url).await?;
    db.init_schema().await?;
    tracing::info!("database ready");

    let bot = Bot::new(cfg.api_token.clone());
    tracing::info!(bot_username = %cfg.bot_username, "starting dispatcher");
    tg::run(bot, cfg, db).await;
    Ok(())
}
