use color_eyre::Result;
use lwm2m_mqtt::{Connecting, Engine, EngineConfig, Subscription};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Wiretaps the endpoints listed under `[watch]` until Ctrl-C
///
/// Usage: `lwm2m-mqtt [config.toml]`
#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load(path.as_deref())?;
    if config.watch.endpoints.is_empty() {
        warn!(
            "No endpoints to watch, list them under [watch] endpoints in {:?}",
            path.unwrap_or_else(EngineConfig::default_path)
        );
    }

    let engine = Engine::<Connecting>::connect(config.clone()).await?;

    let mut endpoints = Vec::with_capacity(config.watch.endpoints.len());
    let mut wiretap: Option<Subscription> = None;
    for name in &config.watch.endpoints {
        let endpoint = engine.endpoint(name, None)?;
        let queue = endpoint.wiretap(wiretap.as_ref());
        wiretap.get_or_insert(queue);
        info!("Watching {}", name);
        endpoints.push(endpoint);
    }

    match wiretap {
        Some(wiretap) => loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                message = wiretap.recv() => match message {
                    Some(message) => {
                        info!(
                            "{} {:?} {}",
                            message.timestamp().format("%H:%M:%S%.3f"),
                            message.direction(),
                            message
                        );
                        debug!("{:?}", message);
                    }
                    None => break,
                },
            }
        },
        None => tokio::signal::ctrl_c().await?,
    }

    info!("Interrupted, shutting down");
    drop(endpoints);
    engine.close().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
