use anyhow::Result;
use log::{debug, error, info, LevelFilter};
use pix_brcode::{
    charge::{ChargeManager, MerchantConf, SettlementEvent, DEFAULT_RETENTION},
    render::SvgQrRenderer,
    server::{app, AppState},
};
use serde::Deserialize;
use simple_logger::SimpleLogger;
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::{runtime::Handle, sync::mpsc};

#[derive(Debug, Deserialize)]
pub struct TlsConf {
    cert_file: String,
    key_file: String,
}

#[derive(Debug, Deserialize)]
pub struct Conf {
    merchant: MerchantConf,
    http_port: u16,
    #[serde(default = "default_bind_address")]
    bind_address: String,
    log_level: Option<String>,
    simulated_confirmation_secs: Option<u64>,
    charge_retention_secs: Option<u64>,
    qr_min_dimension: Option<u32>,
    tls: Option<TlsConf>,
}

fn default_bind_address() -> String {
    String::from("0.0.0.0")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config: Conf = config::Config::builder()
        .add_source(config::File::with_name("./config.toml"))
        .add_source(
            config::Environment::with_prefix("PIX")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    let level = match config.log_level.as_deref() {
        Some(level) => LevelFilter::from_str(level)
            .map_err(|_| anyhow::anyhow!("invalid log_level {:?}", level))?,
        None => LevelFilter::Info,
    };
    SimpleLogger::new().with_level(level).env().init()?;

    let (tx, mut rx) = mpsc::channel::<SettlementEvent>(100);

    let renderer = match config.qr_min_dimension {
        Some(dimension) => SvgQrRenderer::new(dimension),
        None => SvgQrRenderer::default(),
    };

    info!(
        "Issuing charges for {} ({})",
        config.merchant.name, config.merchant.city
    );

    let retention = config
        .charge_retention_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETENTION);

    let manager = Arc::new(ChargeManager::new(
        config.merchant,
        Arc::new(renderer),
        retention,
    ));

    let server = app(AppState {
        manager: manager.clone(),
        tx,
        runtime: Handle::current(),
        simulated_confirmation: config.simulated_confirmation_secs.map(Duration::from_secs),
    });

    let addr = format!("{}:{}", config.bind_address, config.http_port);
    let tls = config.tls;

    tokio::spawn(async move {
        let result = match tls {
            Some(tls) => {
                info!("Listening on https://{}", addr);
                server
                    .listen(
                        tide_rustls::TlsListener::build()
                            .addrs(addr)
                            .cert(tls.cert_file)
                            .key(tls.key_file),
                    )
                    .await
            }
            None => {
                info!("Listening on http://{}", addr);
                server.listen(addr).await
            }
        };

        if let Err(e) = result {
            error!("HTTP listener stopped: {}", e);
        }
    });

    while let Some(event) = rx.recv().await {
        let outcome = manager.on_settlement(event).await;

        debug!("Settlement outcome: {:?}", outcome);
    }

    Ok(())
}
