//! `maas-ws` entry point.
//!
//! Connects to the configured MAAS websocket, logs every notify event,
//! optionally issues one request, and runs until Ctrl-C.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use maas_ws_client::ws::WILDCARD;
use maas_ws_client::{ClientConfig, WsClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::from_env().context("loading configuration")?;
    tracing::info!(endpoint = %config.endpoint, "starting maas-ws");

    let client = WsClient::new(config);
    client.connect().await.context("connecting to MAAS")?;

    let notifications = client.on(WILDCARD, |notify| {
        tracing::info!(event = %notify.event, payload = %notify.payload, "notify");
    });

    if let Ok(method) = std::env::var("MAAS_WS_METHOD") {
        let params = match std::env::var("MAAS_WS_PARAMS") {
            Ok(raw) => serde_json::from_str(&raw).context("MAAS_WS_PARAMS is not valid JSON")?,
            Err(_) => serde_json::json!({}),
        };
        let result = client
            .send(&method, params)
            .await
            .with_context(|| format!("calling {method}"))?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    notifications.unsubscribe();
    client.close().await;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("MAAS_WS_LOG_JSON")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
