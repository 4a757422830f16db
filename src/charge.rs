use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;

use crate::{
    error::PixError,
    payload::{amount_to_cents, build_payload, PixPayloadRequest},
    render::QrRenderer,
};

/// How long a charge stays queryable once paid, or once issued if it is
/// never paid.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Fixed identity embedded in every charge this terminal issues.
#[derive(Debug, Clone, Deserialize)]
pub struct MerchantConf {
    pub pix_key: String,
    #[serde(default = "default_merchant_name")]
    pub name: String,
    #[serde(default = "default_merchant_city")]
    pub city: String,
}

fn default_merchant_name() -> String {
    String::from("NOME EMPRESA")
}

fn default_merchant_city() -> String {
    String::from("SAO PAULO")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Serialize)]
pub struct Charge {
    pub txid: String,
    pub amount: f64,
    pub payload: String,
    pub qr_svg: Option<String>,
    pub rendering_error: Option<String>,
    pub status: ChargeStatus,
    pub created_at_ms: i64,
    pub paid_at_ms: Option<i64>,
}

impl Charge {
    fn expired(&self, now_ms: i64, retention_ms: i64) -> bool {
        let since = self.paid_at_ms.unwrap_or(self.created_at_ms);

        now_ms.saturating_sub(since) >= retention_ms
    }
}

/// Payment confirmation coming from outside: a bank webhook, or the
/// simulated confirmation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SettlementEvent {
    pub txid: String,
    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    Settled(Charge),
    AlreadyPaid,
    UnknownCharge,
    AmountMismatch { expected: f64, received: f64 },
}

/// Registry of issued charges. Shared between the HTTP handlers and the
/// settlement loop; the lock is only held for map access, never across
/// payload building or rendering.
pub struct ChargeManager {
    charges: Mutex<HashMap<String, Charge>>,
    merchant: MerchantConf,
    renderer: Arc<dyn QrRenderer>,
    retention: Duration,
    last_txid_ms: AtomicI64,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

impl ChargeManager {
    pub fn new(
        merchant: MerchantConf,
        renderer: Arc<dyn QrRenderer>,
        retention: Duration,
    ) -> Self {
        Self {
            charges: Mutex::new(HashMap::default()),
            merchant,
            renderer,
            retention,
            last_txid_ms: AtomicI64::new(0),
        }
    }

    /// `TXID<millis>`. Two charges in the same millisecond get consecutive
    /// values, so ids never repeat within a process.
    fn next_txid(&self, timestamp: i64) -> String {
        let previous = self
            .last_txid_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(timestamp.max(last + 1))
            })
            .unwrap_or(timestamp);

        format!("TXID{}", timestamp.max(previous + 1))
    }

    /// Issue a new charge. Input errors fail the call; a rendering failure
    /// does not, the charge keeps its payload and records the error.
    pub async fn create_charge(&self, amount: f64) -> Result<Charge, PixError> {
        let created_at_ms = now_ms();
        let txid = self.next_txid(created_at_ms);

        let payload = build_payload(&PixPayloadRequest {
            pix_key: self.merchant.pix_key.clone(),
            amount,
            merchant_name: self.merchant.name.clone(),
            merchant_city: self.merchant.city.clone(),
            transaction_id: txid.clone(),
        })?;

        let (qr_svg, rendering_error) = match self.renderer.render(&payload).await {
            Ok(svg) => (Some(svg), None),
            Err(e) => {
                warn!("Charge {}: {}", txid, e);
                (None, Some(e.to_string()))
            }
        };

        let charge = Charge {
            txid: txid.clone(),
            amount,
            payload,
            qr_svg,
            rendering_error,
            status: ChargeStatus::Pending,
            created_at_ms,
            paid_at_ms: None,
        };

        {
            let mut charges = self.charges.lock().await;
            self.evict_expired(&mut charges);
            charges.insert(txid.clone(), charge.clone());
        }

        info!("Charge {} created for {:.2}", txid, amount);

        Ok(charge)
    }

    fn evict_expired(&self, charges: &mut HashMap<String, Charge>) {
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let now = now_ms();
        let before = charges.len();

        charges.retain(|_, charge| !charge.expired(now, retention_ms));

        if charges.len() < before {
            debug!("Evicted {} expired charges", before - charges.len());
        }
    }

    pub async fn get(&self, txid: &str) -> Option<Charge> {
        self.charges.lock().await.get(txid).cloned()
    }

    pub async fn len(&self) -> usize {
        self.charges.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.charges.lock().await.is_empty()
    }

    pub async fn on_settlement(&self, event: SettlementEvent) -> SettlementOutcome {
        let mut charges = self.charges.lock().await;

        let Some(charge) = charges.get_mut(&event.txid) else {
            warn!("Settlement for unknown charge {}", event.txid);
            return SettlementOutcome::UnknownCharge;
        };

        if charge.status == ChargeStatus::Paid {
            info!("Charge {} settled twice, ignoring", event.txid);
            return SettlementOutcome::AlreadyPaid;
        }

        if let Some(received) = event.amount {
            let matches = match (amount_to_cents(received), amount_to_cents(charge.amount)) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };

            if !matches {
                warn!(
                    "Charge {} settled with {} but {} was requested",
                    event.txid, received, charge.amount
                );
                return SettlementOutcome::AmountMismatch {
                    expected: charge.amount,
                    received,
                };
            }
        }

        charge.status = ChargeStatus::Paid;
        charge.paid_at_ms = Some(now_ms());

        info!("Charge {} paid", event.txid);

        SettlementOutcome::Settled(charge.clone())
    }
}
