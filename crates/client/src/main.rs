//! tally-listen: connect to a realtime endpoint and print what arrives.
//!
//! ```text
//! TALLY_WS_URL=ws://localhost:8080/api/ws tally-listen reports invoices
//! ```
//!
//! Every argument is a channel to subscribe to. `TALLY_TOKEN`, if set, is
//! sent as the session token.

use anyhow::{bail, Context};
use tally_client::{
    Callback, ConnectionEvent, Envelope, EventKind, NotificationCenter, RealtimeClient,
    RealtimeConfig, StaticToken, TungsteniteConnector,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tally_client=debug")),
        )
        .init();

    let config = RealtimeConfig::from_env();
    if !config.enabled {
        bail!("realtime is disabled (TALLY_REALTIME_ENABLED=false)");
    }
    let url = config
        .url
        .clone()
        .context("no endpoint configured; set TALLY_WS_URL")?;

    let mut connector = TungsteniteConnector::new();
    if let Ok(token) = std::env::var("TALLY_TOKEN") {
        connector = connector.with_token_provider(StaticToken(token));
    }
    let client = RealtimeClient::with_connector(config, connector);

    let mut channels = Vec::new();
    for channel in std::env::args().skip(1) {
        let name = channel.clone();
        channels.push(client.subscribe(
            channel,
            Callback::new(move |msg: &Envelope| {
                println!("[{}] {} {}", name, msg.r#type, msg.payload);
            }),
        ));
    }

    let _exhausted = client.on(
        EventKind::MaxReconnectAttemptsReached,
        Callback::new(|event: &ConnectionEvent| {
            tracing::error!(?event, "giving up; restart tally-listen to try again");
        }),
    );

    let center = NotificationCenter::attach(&client);
    let mut toasts = center.subscribe_toasts();
    tokio::spawn(async move {
        while let Ok(toast) = toasts.recv().await {
            println!(
                "{} {:?} {}: {}",
                toast.category.icon(),
                toast.priority,
                toast.title,
                toast.message
            );
        }
    });

    tracing::info!(%url, channels = channels.len(), "starting");
    client.connect(None);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    for subscription in channels {
        subscription.unsubscribe();
    }
    tracing::info!(unread = center.unread_count(), "shutting down");
    client.shutdown();
    Ok(())
}
