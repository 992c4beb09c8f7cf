use std::sync::Arc;

use tracing::info;

use chatwire::strategy::StrategyCtx;
use chatwire::sync::{FileStore, PhaseBus, SharedStore, TriggerFlag};
use chatwire::{select_strategy, BrowserSession, ControlBridge, Interceptor, WireConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = WireConfig::load();

    let store: Arc<dyn SharedStore> = Arc::new(FileStore::new(config.resolve_store_dir()));
    let bus = Arc::new(PhaseBus::new());
    let trigger = Arc::new(TriggerFlag::new(store.clone()));
    let slot: chatwire::WatcherSlot = Arc::new(tokio::sync::Mutex::new(None));

    let session = BrowserSession::launch(&config).await?;
    let hostname = session.hostname().await?;
    let strategy = select_strategy(&hostname);

    let interceptor = Interceptor::new(slot.clone(), trigger.clone());
    interceptor.install(&session.page).await?;

    let ctx = Arc::new(StrategyCtx {
        page: session.page.clone(),
        store,
        bus,
        slot,
        trigger,
    });
    let bridge = ControlBridge::new(&config, ctx, strategy);

    tokio::select! {
        _ = bridge.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    session.shutdown().await;
    Ok(())
}
