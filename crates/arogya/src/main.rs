use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use arogya_backend::AnalysisClient;
use arogya_core::{
    analysis::AnalysisService,
    bot::{Dispatcher, DispatcherConfig},
    config::Config,
    messaging::throttled::{ThrottleConfig, ThrottledMessenger},
    session::InMemorySessionStore,
};
use arogya_whatsapp::{
    inbox::Inbox,
    router::{self, AppState},
    WppConfig, WppConnectMessenger,
};

const WPP_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), arogya_core::Error> {
    arogya_core::logging::init("arogya")?;

    let cfg = Config::load()?;

    let analysis = Arc::new(AnalysisClient::new(
        &cfg.analysis_api_url,
        cfg.analysis_timeout,
    )?);
    match analysis.health().await {
        Ok(()) => info!(url = %cfg.analysis_api_url, "analysis service reachable"),
        Err(e) => warn!(url = %cfg.analysis_api_url, error = %e, "analysis service health check failed"),
    }

    let wpp = Arc::new(WppConnectMessenger::new(WppConfig {
        base_url: cfg.wpp_base_url.clone(),
        session: cfg.wpp_session.clone(),
        token: cfg.wpp_token.clone(),
        timeout: WPP_TIMEOUT,
    })?);
    let messenger = Arc::new(ThrottledMessenger::new(
        wpp,
        ThrottleConfig {
            global_min_interval: cfg.throttle_global,
            per_chat_min_interval: cfg.throttle_per_chat,
        },
    ));

    let store = Arc::new(InMemorySessionStore::new(cfg.session_ttl));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        messenger.clone(),
        analysis,
        DispatcherConfig::from(&cfg),
    ));

    let shutdown = CancellationToken::new();

    let sweeper = spawn_sweeper(
        store.clone(),
        dispatcher.clone(),
        messenger.clone(),
        cfg.session_sweep_interval,
        shutdown.clone(),
    );

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler failed");
            }
            info!("shutdown requested");
            shutdown.cancel();
        });
    }

    let state = Arc::new(AppState {
        inbox: Inbox::new(dispatcher),
        webhook_secret: cfg.webhook_secret.clone(),
        wpp_session: cfg.wpp_session.clone(),
    });

    info!(
        session = %cfg.wpp_session,
        wpp = %cfg.wpp_base_url,
        ttl_secs = cfg.session_ttl.map(|d| d.as_secs()).unwrap_or(0),
        "arogya bot starting"
    );

    let served = router::serve(&cfg.webhook_bind, state, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "session sweeper task failed");
    }

    served.map_err(|e| arogya_core::Error::External(format!("webhook server failed: {e:#}")))
}

/// Periodic housekeeping: expired sessions, idle conversation locks, idle throttle slots.
fn spawn_sweeper(
    store: Arc<InMemorySessionStore>,
    dispatcher: Arc<Dispatcher>,
    messenger: Arc<ThrottledMessenger>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let removed = store.sweep_expired().await;
                    if removed > 0 {
                        info!(removed, "expired sessions swept");
                    }
                    dispatcher.locks().prune().await;
                    let throttles = messenger.prune_idle().await;
                    debug!(throttles, "idle throttle slots pruned");
                }
            }
        }
    })
}
