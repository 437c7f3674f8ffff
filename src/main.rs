//! chanlinkd - XMPP/IRC gateway daemon.

use chanlinkd::bridge::Bridge;
use chanlinkd::component::{ComponentStream, Stanza};
use chanlinkd::config::Config;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Pick the TLS provider once, before any session is built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "chanlinkd.toml".to_owned());
    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "failed to load config");
        e
    })?;

    info!(
        domain = %config.component.hostname,
        xmpp = %format!("{}:{}", config.component.host, config.component.port),
        "starting chanlinkd"
    );

    let stream = ComponentStream::connect(
        &config.component.host,
        config.component.port,
        &config.component.hostname,
        &config.component.secret,
    )
    .await?;

    let (to_component_tx, mut to_component_rx) = mpsc::channel::<Stanza>(256);
    let (from_component_tx, from_component_rx) = mpsc::channel::<Stanza>(256);

    // One task owns the stream and pumps stanzas both ways.
    let pump = tokio::spawn(async move {
        let mut stream = stream;
        loop {
            tokio::select! {
                incoming = stream.recv() => match incoming {
                    Ok(stanza) => {
                        if from_component_tx.send(stanza).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "component stream ended");
                        break;
                    }
                },
                outgoing = to_component_rx.recv() => match outgoing {
                    Some(stanza) => {
                        if let Err(e) = stream.send(&stanza).await {
                            error!(error = %e, "component send failed");
                            break;
                        }
                    }
                    None => {
                        let _ = stream.close().await;
                        break;
                    }
                },
            }
        }
    });

    let bridge = Bridge::new(config, from_component_rx, to_component_tx);
    tokio::select! {
        _ = bridge.run() => info!("bridge finished"),
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }
    pump.abort();
    Ok(())
}
