use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use quorum_pay::config::Config;
use quorum_pay::create_app;
use quorum_pay::startup::{self, Services, DEMO_ACCOUNT_ID};

async fn setup() -> (Router, Services) {
    let config = Config {
        custody_latency_ms: 0,
        custody_latency_jitter_ms: 0,
        custody_confirmation_delay_secs: 60,
        ..Config::default()
    };
    let services = startup::build(&config).await.unwrap();
    (create_app(services.state.clone()), services)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

fn pix_payment(amount: &str) -> Value {
    json!({
        "account_id": DEMO_ACCOUNT_ID,
        "currency": "BRL",
        "amount": amount,
        "recipient": {"name": "Porto Seco Logistica", "account": "financeiro@portoseco.com.br"},
        "references": {"invoice_number": "INV-2024-001"}
    })
}

#[tokio::test]
async fn test_health_reports_closed_circuit() {
    let (app, services) = setup().await;

    let (status, body) = send(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["custody_circuit"], "closed");
    assert_eq!(body["required_signatures"], 2);
    assert_eq!(body["settlements_in_flight"], 0);

    services.shutdown();
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let (app, services) = setup().await;

    let (status, body) = send(&app, post("/payments", None, pix_payment("100"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["retryable"], false);

    services.shutdown();
}

#[tokio::test]
async fn test_create_and_sign_over_http() {
    let (app, services) = setup().await;

    let (status, created) = send(
        &app,
        post("/payments", Some("user_ana"), pix_payment("50000")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending_signature_2");
    assert_eq!(created["collected_signatures"], 1);
    assert_eq!(created["service_fee"], "125.00");
    let id = created["transaction_id"].as_str().unwrap().to_string();

    let (status, pending) = send(
        &app,
        get(
            &format!("/payments/pending?account_id={}", DEMO_ACCOUNT_ID),
            Some("user_bruno"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["transaction_id"], id.as_str());

    let (status, signed) = send(
        &app,
        post(
            "/payments/sign",
            Some("user_bruno"),
            json!({"transaction_id": id, "action": "approve"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(signed["status"], "complete");

    let (status, again) = send(
        &app,
        post(
            "/payments/sign",
            Some("user_bruno"),
            json!({"transaction_id": id, "action": "approve"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(again["code"], "NOT_SIGNABLE");

    let (status, details) = send(&app, get(&format!("/payments/{}", id), Some("user_carla"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["transaction"]["status"], "complete");
    assert_eq!(details["approvals"].as_array().unwrap().len(), 2);

    services.shutdown();
}

#[tokio::test]
async fn test_error_bodies() {
    let (app, services) = setup().await;

    let (status, body) = send(
        &app,
        post("/payments", Some("user_ana"), pix_payment("-5")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_AMOUNT");

    let (status, body) = send(
        &app,
        post("/payments", Some("user_nobody"), pix_payment("10")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_AUTHORIZED");

    let (status, body) = send(
        &app,
        get("/payments/00000000-0000-0000-0000-000000000000", Some("user_ana")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TRANSACTION_NOT_FOUND");

    let (status, body) = send(&app, get("/accounts/acct_missing/wallet", Some("user_ana"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_AUTHORIZED");

    services.shutdown();
}

#[tokio::test]
async fn test_chain_payment_shows_in_wallet() {
    let (app, services) = setup().await;

    let (status, created) = send(
        &app,
        post(
            "/payments",
            Some("user_ana"),
            json!({
                "account_id": DEMO_ACCOUNT_ID,
                "currency": "USD",
                "amount": "18000",
                "recipient": {
                    "name": "Shanghai Freight Co",
                    "account": format!("0x{}", "ab".repeat(20))
                }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["custody_transaction_id"].is_string());
    let id = created["transaction_id"].as_str().unwrap().to_string();

    let (status, signed) = send(
        &app,
        post(
            "/payments/sign",
            Some("user_carla"),
            json!({"transaction_id": id, "action": "approve"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(signed["status"], "broadcasting");
    assert!(signed["blockchain_reference"]
        .as_str()
        .unwrap()
        .starts_with("0x"));

    let (status, wallet) = send(
        &app,
        get(&format!("/accounts/{}/wallet", DEMO_ACCOUNT_ID), Some("user_ana")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wallet["vault"]["threshold"], 2);
    assert_eq!(wallet["in_flight"].as_array().unwrap().len(), 1);
    assert_eq!(wallet["in_flight"][0]["status"], "broadcasting");

    services.shutdown();
}

#[tokio::test]
async fn test_incoming_payment_over_http() {
    let (app, services) = setup().await;

    let (status, tx) = send(
        &app,
        post(
            "/payments/incoming",
            Some("user_bruno"),
            json!({
                "account_id": DEMO_ACCOUNT_ID,
                "currency": "BRL",
                "amount": "1000",
                "sender": {"name": "Cliente SA", "account": "cliente@pix"}
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tx["kind"], "receive");
    assert_eq!(tx["status"], "complete");

    services.shutdown();
}

#[tokio::test]
async fn test_account_routes_require_a_member() {
    let (app, services) = setup().await;

    let (status, created) = send(
        &app,
        post("/payments", Some("user_ana"), pix_payment("100")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["transaction_id"].as_str().unwrap().to_string();

    let incoming = json!({
        "account_id": DEMO_ACCOUNT_ID,
        "currency": "BRL",
        "amount": "1000000",
        "sender": {"name": "Anyone", "account": "anyone@pix"}
    });
    let uris = [
        format!("/payments/{}", id),
        format!("/accounts/{}/wallet", DEMO_ACCOUNT_ID),
        format!("/accounts/{}/overview", DEMO_ACCOUNT_ID),
    ];

    let (status, _) = send(&app, post("/payments/incoming", None, incoming.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    for uri in &uris {
        let (status, body) = send(&app, get(uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    let (status, body) = send(
        &app,
        post("/payments/incoming", Some("user_stranger"), incoming),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_AUTHORIZED");
    for uri in &uris {
        let (status, body) = send(&app, get(uri, Some("user_stranger"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["code"], "NOT_AUTHORIZED");
    }

    services.shutdown();
}

#[tokio::test]
async fn test_account_overview_over_http() {
    let (app, services) = setup().await;

    let (status, created) = send(
        &app,
        post("/payments", Some("user_ana"), pix_payment("1000")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, overview) = send(
        &app,
        get(
            &format!("/accounts/{}/overview", DEMO_ACCOUNT_ID),
            Some("user_bruno"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["pending_payments"], 1);
    assert_eq!(overview["balances"][0]["currency"], "BRL");
    assert_eq!(overview["balances"][0]["available"], "848997.50");
    assert_eq!(overview["recent"][0]["transaction_id"], created["transaction_id"]);
    assert_eq!(overview["recent"][0]["kind"], "send");
    assert_eq!(overview["recent"][0]["approved_by"][0], "Ana Ribeiro");

    services.shutdown();
}
