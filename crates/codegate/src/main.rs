use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use codegate_completion::HttpCompletionClient;
use codegate_core::{
    config::Config,
    gateway::Gateway,
    ports::CompletionPort,
    store::{MemoryStore, SqliteStore, Store},
};
use codegate_telegram::AppState;
use codegate_web::WebState;

const WEB_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), codegate_core::Error> {
    codegate_core::logging::init("codegate")?;

    let cfg = Arc::new(Config::load()?);

    let store: Arc<dyn Store> = match &cfg.store_file {
        Some(path) => Arc::new(SqliteStore::open(path).await?),
        None => {
            tracing::warn!("STORE_FILE=:memory:, nothing will survive a restart");
            Arc::new(MemoryStore::in_memory())
        }
    };
    let gateway = Arc::new(Gateway::new(store, cfg.gateway_config()?));

    let completion: Arc<dyn CompletionPort> = Arc::new(HttpCompletionClient::new(
        cfg.completion_api_url.clone(),
        cfg.completion_timeout,
    )?);

    let shutdown = CancellationToken::new();

    let bot_state = Arc::new(AppState {
        cfg: cfg.clone(),
        gateway: gateway.clone(),
        completion: completion.clone(),
    });
    let web_state = Arc::new(WebState {
        gateway,
        completion,
    });

    let mut web = {
        let addr = cfg.web_bind_addr.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { codegate_web::serve(&addr, web_state, shutdown).await })
    };

    let mut web_done = false;
    let result = tokio::select! {
        res = codegate_telegram::run_polling(bot_state) => res
            .map_err(|e| codegate_core::Error::External(format!("telegram bot failed: {e}"))),
        res = &mut web => {
            web_done = true;
            match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(codegate_core::Error::External(format!("web api failed: {e}"))),
                Err(e) => Err(codegate_core::Error::External(format!("web api task failed: {e}"))),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
            Ok(())
        }
    };

    shutdown.cancel();
    if !web_done {
        match tokio::time::timeout(WEB_DRAIN_TIMEOUT, web).await {
            Ok(Ok(Ok(()))) => tracing::info!("web api stopped"),
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "web api failed during shutdown"),
            Ok(Err(e)) => tracing::error!(error = %e, "web api task failed during shutdown"),
            Err(_) => tracing::warn!("web api did not drain in time"),
        }
    }
    result
}
