use log::warn;
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tide::{Body, Request, Response, StatusCode};
use tokio::{runtime::Handle, sync::mpsc::Sender};

use crate::{
    charge::{ChargeManager, SettlementEvent},
    payload::{build_payload, verify_payload, PixPayloadRequest},
};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChargeManager>,
    pub tx: Sender<SettlementEvent>,
    /// tide serves connections on its own executor; timers have to be
    /// spawned onto the tokio runtime through this handle.
    pub runtime: Handle,
    /// Stand-in for a bank webhook: confirm every charge after this delay.
    pub simulated_confirmation: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct CreateCharge {
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct VerifyPayload {
    payload: String,
}

#[derive(Debug, Default, Deserialize)]
struct Settlement {
    #[serde(default)]
    amount: Option<f64>,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    Response::builder(status)
        .body(json!({ "error": error.to_string() }))
        .build()
}

pub fn app(state: AppState) -> tide::Server<AppState> {
    let mut app = tide::with_state(state);

    app.at("/payloads").post(encode_payload);
    app.at("/payloads/verify").post(decode_payload);
    app.at("/charges").post(create_charge);
    app.at("/charges/:txid").get(get_charge);
    app.at("/charges/:txid/settlement").post(settle_charge);

    app
}

async fn encode_payload(mut req: Request<AppState>) -> tide::Result {
    let request: PixPayloadRequest = req.body_json().await?;

    Ok(match build_payload(&request) {
        Ok(payload) => Response::builder(StatusCode::Ok)
            .body(json!({ "payload": payload }))
            .build(),
        Err(e) => error_response(StatusCode::UnprocessableEntity, e),
    })
}

async fn decode_payload(mut req: Request<AppState>) -> tide::Result {
    let VerifyPayload { payload } = req.body_json().await?;

    Ok(match verify_payload(&payload) {
        Ok(decoded) => Response::builder(StatusCode::Ok)
            .body(Body::from_json(&decoded)?)
            .build(),
        Err(e) => error_response(StatusCode::UnprocessableEntity, e),
    })
}

async fn create_charge(mut req: Request<AppState>) -> tide::Result {
    let CreateCharge { amount } = req.body_json().await?;

    let state = req.state();
    let result = state.manager.create_charge(amount).await;

    if let (Ok(charge), Some(delay)) = (&result, state.simulated_confirmation) {
        let tx = state.tx.clone();
        let event = SettlementEvent {
            txid: charge.txid.clone(),
            amount: Some(charge.amount),
        };

        state.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            if tx.send(event).await.is_err() {
                warn!("Settlement queue closed, simulated confirmation dropped");
            }
        });
    }

    Ok(match result {
        Ok(charge) => Response::builder(StatusCode::Created)
            .body(Body::from_json(&charge)?)
            .build(),
        Err(e) => error_response(StatusCode::UnprocessableEntity, e),
    })
}

async fn get_charge(req: Request<AppState>) -> tide::Result {
    let txid = req.param("txid")?;

    let charge = req.state().manager.get(txid).await;

    Ok(match charge {
        Some(charge) => Response::builder(StatusCode::Ok)
            .body(Body::from_json(&charge)?)
            .build(),
        None => error_response(StatusCode::NotFound, format!("unknown charge {}", txid)),
    })
}

/// Webhook entry point. The event is queued for the settlement loop; the
/// response only acknowledges receipt.
async fn settle_charge(mut req: Request<AppState>) -> tide::Result {
    let body = req.body_string().await?;
    let Settlement { amount } = if body.trim().is_empty() {
        Settlement::default()
    } else {
        serde_json::from_str(&body)
            .map_err(|e| tide::Error::from_str(StatusCode::UnprocessableEntity, e.to_string()))?
    };

    let event = SettlementEvent {
        txid: req.param("txid")?.to_string(),
        amount,
    };

    if let Err(e) = req.state().tx.send(event).await {
        warn!("Settlement queue closed: {}", e);
        return Ok(error_response(StatusCode::ServiceUnavailable, e));
    }

    Ok(Response::new(StatusCode::Accepted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        charge::{ChargeStatus, MerchantConf, SettlementOutcome, DEFAULT_RETENTION},
        error::PixError,
        render::QrRenderer,
    };
    use async_trait::async_trait;
    use serde_json::Value;
    use tide::http::{Method, Url};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        sync::mpsc,
    };

    struct FixedRenderer;

    #[async_trait]
    impl QrRenderer for FixedRenderer {
        async fn render(&self, _payload: &str) -> Result<String, PixError> {
            Ok(String::from("<svg/>"))
        }
    }

    fn test_app(
        simulated_confirmation: Option<Duration>,
    ) -> (tide::Server<AppState>, mpsc::Receiver<SettlementEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let manager = ChargeManager::new(
            MerchantConf {
                pix_key: String::from("12345678900"),
                name: String::from("PDV Inteligente"),
                city: String::from("SAO PAULO"),
            },
            Arc::new(FixedRenderer),
            DEFAULT_RETENTION,
        );

        let state = AppState {
            manager: Arc::new(manager),
            tx,
            runtime: Handle::current(),
            simulated_confirmation,
        };

        (app(state), rx)
    }

    async fn call(
        app: &tide::Server<AppState>,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = Url::parse(&format!("http://localhost{}", path)).unwrap();
        let mut req = tide::http::Request::new(method, url);
        if let Some(body) = body {
            req.set_body(Body::from_json(&body).unwrap());
        }

        let mut res: tide::http::Response = app.respond(req).await.unwrap();
        let text = res.body_string().await.unwrap();
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        };

        (res.status(), value)
    }

    #[tokio::test]
    async fn test_encode_and_verify_routes() {
        let (app, _rx) = test_app(None);

        let (status, body) = call(
            &app,
            Method::Post,
            "/payloads",
            Some(json!({
                "pix_key": "12345678900",
                "amount": 13.5,
                "merchant_name": "PDV Inteligente",
                "merchant_city": "SAO PAULO",
                "txid": "TXID1700000000000"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::Ok);
        let payload = body["payload"].as_str().unwrap().to_string();
        assert!(payload.ends_with("6304F239"));

        let (status, body) = call(
            &app,
            Method::Post,
            "/payloads/verify",
            Some(json!({ "payload": payload })),
        )
        .await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body["transaction_id"], "TXID1700000000000");
    }

    #[tokio::test]
    async fn test_encode_route_reports_input_errors() {
        let (app, _rx) = test_app(None);

        let (status, body) = call(
            &app,
            Method::Post,
            "/payloads",
            Some(json!({
                "pix_key": "12345678900",
                "amount": -1.0,
                "merchant_name": "PDV Inteligente",
                "merchant_city": "SAO PAULO",
                "transaction_id": "TX1"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::UnprocessableEntity);
        assert!(body["error"].as_str().unwrap().starts_with("invalid amount"));
    }

    #[tokio::test]
    async fn test_charge_routes() {
        let (app, mut rx) = test_app(None);

        let (status, charge) = call(
            &app,
            Method::Post,
            "/charges",
            Some(json!({ "amount": 21.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::Created);
        assert_eq!(charge["status"], "pending");
        let txid = charge["txid"].as_str().unwrap().to_string();

        let (status, fetched) = call(&app, Method::Get, &format!("/charges/{}", txid), None).await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(fetched["payload"], charge["payload"]);

        let (status, _) = call(&app, Method::Get, "/charges/TXID0", None).await;
        assert_eq!(status, StatusCode::NotFound);

        let (status, _) = call(
            &app,
            Method::Post,
            &format!("/charges/{}/settlement", txid),
            Some(json!({ "amount": 21.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::Accepted);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.txid, txid);
        assert_eq!(event.amount, Some(21.0));

        let state = app.state().clone();
        let outcome = state.manager.on_settlement(event).await;
        assert!(matches!(outcome, SettlementOutcome::Settled(_)));
        assert_eq!(
            state.manager.get(&txid).await.map(|c| c.status),
            Some(ChargeStatus::Paid)
        );
    }

    #[tokio::test]
    async fn test_simulated_confirmation_goes_through_the_queue() {
        let (app, mut rx) = test_app(Some(Duration::from_millis(10)));

        let (status, charge) = call(
            &app,
            Method::Post,
            "/charges",
            Some(json!({ "amount": 5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::Created);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.txid, charge["txid"].as_str().unwrap());
        assert_eq!(event.amount, Some(5.0));
    }

    /// Goes through tide's own listener and executor rather than
    /// `Server::respond`, so handlers run off the tokio runtime as they do in
    /// production.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_simulated_confirmation_over_a_real_listener() {
        let (app, mut rx) = test_app(Some(Duration::from_millis(10)));

        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        tokio::spawn(async move { app.listen(addr.to_string()).await });

        let mut stream = None;
        for _ in 0..100 {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let mut stream = stream.expect("listener never came up");

        let body = r#"{"amount":5.0}"#;
        let request = format!(
            "POST /charges HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            addr,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 201"), "{}", response);

        let (_, json) = response.split_once("\r\n\r\n").unwrap();
        let charge: Value = serde_json::from_str(json).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.txid, charge["txid"].as_str().unwrap());
        assert_eq!(event.amount, Some(5.0));
    }
}
