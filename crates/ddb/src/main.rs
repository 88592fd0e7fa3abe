use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use ddb_core::{
    config::Config,
    ports::{Polisher, PolisherDisabled, QrDisabled},
    router::Router,
    scheduler::BackupScheduler,
    store::Store,
};
use ddb_polish::PolishClient;
use ddb_telegram::TelegramMessenger;

#[tokio::main]
async fn main() -> Result<(), ddb_core::Error> {
    ddb_core::logging::init("ddb");

    let cfg = Arc::new(Config::load()?);
    let store = Arc::new(Store::open(&cfg.db_path)?);

    let polisher: Arc<dyn Polisher> = match &cfg.polish_api_key {
        Some(key) => Arc::new(PolishClient::new(
            key.clone(),
            cfg.polish_base_url.clone(),
            cfg.polish_model.clone(),
        )),
        None => {
            info!("POLISH_API_KEY not set, entries keep their raw text");
            Arc::new(PolisherDisabled)
        }
    };

    let router = Arc::new(Router::new(
        cfg.clone(),
        store.clone(),
        polisher,
        Arc::new(QrDisabled),
    ));

    let transport = Arc::new(TelegramMessenger::from_token(&cfg.telegram_bot_token));
    let scheduler = Arc::new(BackupScheduler::new(store.clone(), transport));
    let shutdown = CancellationToken::new();
    let scheduler_task = scheduler.spawn(cfg.backup_poll_interval, shutdown.clone());

    let result = ddb_telegram::router::run_polling(cfg, router)
        .await
        .map_err(|e| ddb_core::Error::External(format!("telegram bot failed: {e}")));

    shutdown.cancel();
    let _ = scheduler_task.await;
    result
}
