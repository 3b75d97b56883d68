use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tavern_gateway::config::{resolve_secret_source, GatewayConfig, StorageBackendConfig};
use tavern_gateway::metrics::GatewayMetrics;
use tavern_gateway::routes;
use tavern_gateway::state::AppState;
use tavern_llm::prelude::{
    CredentialStore, ImageGenerator, ProviderGateway, ProviderGatewayConfig,
};
use tavern_storage::prelude::{
    ChatStore, MemoryObjectStore, MemoryStore, ObjectStore, RestConfig, RestStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = GatewayConfig::load().context("load gateway configuration")?;
    let state = build_state(&config).context("assemble application state")?;

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "gateway listening");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;

    info!("gateway stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_state(config: &GatewayConfig) -> anyhow::Result<AppState> {
    let (store, objects): (Arc<dyn ChatStore>, Arc<dyn ObjectStore>) = match &config.storage {
        StorageBackendConfig::Memory => {
            info!("using in-memory storage backend");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryObjectStore::new()),
            )
        }
        StorageBackendConfig::Rest {
            base_url,
            service_key,
            bucket,
        } => {
            let service_key = resolve_secret_source(service_key)?;
            let mut rest_config = RestConfig::new(base_url, service_key)?;
            if let Some(bucket) = bucket {
                rest_config = rest_config.with_bucket(bucket.clone());
            }
            let rest = Arc::new(RestStore::new(rest_config)?);
            info!(%base_url, "using rest storage backend");
            (rest.clone(), rest)
        }
    };

    let creds = CredentialStore::from_env();
    let request_timeout = Duration::from_secs(config.llm.request_timeout_secs);
    let provider_config = ProviderGatewayConfig {
        request_timeout,
        max_concurrent_requests: config.llm.max_concurrent_requests,
    };
    let chat = Arc::new(ProviderGateway::new(creds.clone(), provider_config)?);
    let images = Arc::new(ImageGenerator::new(creds, request_timeout)?);

    let service_secret = config
        .auth
        .service_secret
        .as_deref()
        .map(resolve_secret_source)
        .transpose()?;

    Ok(AppState {
        store,
        objects,
        chat,
        images,
        service_secret,
        call_timeout: request_timeout,
        history_limit: config.llm.history_limit,
        metrics: Arc::new(GatewayMetrics::default()),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutdown: ctrl-c"),
        _ = terminate => info!("shutdown: terminate signal"),
    }
}
