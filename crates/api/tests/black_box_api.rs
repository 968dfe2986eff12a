use std::sync::Arc;

use pointsledger_api::app::services::AppServices;
use pointsledger_core::UserId;
use pointsledger_infra::LedgerConfig;
use pointsledger_points::ActionCatalog;
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory store, bound to an ephemeral port.
        let services = AppServices::in_memory(
            LedgerConfig::default()
                .with_max_attempts(50)
                .with_history_limits(20, 50),
            ActionCatalog::default(),
        );
        let app = pointsledger_api::app::build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn account_url(&self, user: UserId, suffix: &str) -> String {
        format!("{}/accounts/{}{}", self.base_url, user, suffix)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post_json(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let res = client.post(url).json(&body).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

async fn get_json(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let res = client.get(url).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_member_gets_a_zeroed_bronze_account() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, srv.account_url(UserId::new(), "")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points_balance"], 0);
    assert_eq!(body["lifetime_points"], 0);
    assert_eq!(body["tier"], "bronze");
    assert_eq!(body["points_to_next_tier"], 500);
}

#[tokio::test]
async fn award_redeem_and_history_lifecycle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": 300, "transaction_type": "purchase", "description": "order 1"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["replayed"], false);
    assert_eq!(body["transaction"]["transaction_type"], "PURCHASE");

    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": 250, "transaction_type": "PURCHASE", "description": "order 2"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["account"]["tier"], "silver");
    assert_eq!(body["tier_change"]["from"], "bronze");
    assert_eq!(body["tier_change"]["to"], "silver");

    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/redemptions"),
        json!({"points": 100, "description": "voucher"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["account"]["points_balance"], 450);
    assert_eq!(body["account"]["lifetime_points"], 550);
    assert_eq!(body["transaction"]["points_amount"], -100);
    assert_eq!(body["transaction"]["transaction_type"], "REDEMPTION");

    let (status, body) = get_json(&client, srv.account_url(user, "/transactions?limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    let amounts: Vec<i64> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["points_amount"].as_i64().unwrap())
        .collect();
    assert_eq!(amounts, vec![-100, 250]);

    let (status, body) = get_json(&client, srv.account_url(user, "/reconciliation")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["consistent"], true);
    assert_eq!(body["report"]["ledger_sum"], 450);
}

#[tokio::test]
async fn insufficient_balance_is_unprocessable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": 50, "transaction_type": "REVIEW", "description": "review"}),
    )
    .await;

    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/redemptions"),
        json!({"points": 100, "description": "voucher"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_balance");

    let (_, account) = get_json(&client, srv.account_url(user, "")).await;
    assert_eq!(account["points_balance"], 50);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": 0, "transaction_type": "REVIEW", "description": "nothing"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_amount");

    let (status, _) = post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": 10, "transaction_type": "REVIEW", "description": "seed"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": i64::MAX, "transaction_type": "REVIEW", "description": "overflow"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_amount");

    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": 10, "transaction_type": "not a type!", "description": "x"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = get_json(&client, format!("{}/accounts/not-a-uuid", srv.base_url)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_user_id");
}

#[tokio::test]
async fn repeated_reference_is_replayed_not_double_counted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();
    let body = json!({
        "points": 200,
        "transaction_type": "REFERRAL",
        "description": "referral bonus",
        "reference_id": "referral-42"
    });

    let (first_status, first) =
        post_json(&client, srv.account_url(user, "/awards"), body.clone()).await;
    let (second_status, second) = post_json(&client, srv.account_url(user, "/awards"), body).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["transaction"]["id"], first["transaction"]["id"]);
    assert_eq!(second["account"]["points_balance"], 200);
}

#[tokio::test]
async fn catalog_actions_award_configured_points() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let (status, body) = post_json(&client, srv.account_url(user, "/actions/signup"), json!({})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction"]["points_amount"], 100);
    assert_eq!(body["transaction"]["transaction_type"], "SIGNUP");

    let (status, body) = post_json(
        &client,
        srv.account_url(user, "/actions/purchase"),
        json!({"units": 42, "reference_id": "order-9"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction"]["points_amount"], 42);

    let (status, body) = post_json(&client, srv.account_url(user, "/actions/purchase"), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = post_json(&client, srv.account_url(user, "/actions/teleport"), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get_json(&client, format!("{}/actions", srv.base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 11);
}

#[tokio::test]
async fn standing_and_tier_benefits() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    post_json(
        &client,
        srv.account_url(user, "/awards"),
        json!({"points": 2500, "transaction_type": "PURCHASE", "description": "big order"}),
    )
    .await;

    let (status, body) = get_json(&client, srv.account_url(user, "/standing")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "gold");
    assert_eq!(body["next_tier"], "platinum");
    assert_eq!(body["points_to_next_tier"], 2500);
    assert_eq!(body["benefits"].as_array().unwrap().len(), 6);

    let (status, body) = get_json(&client, format!("{}/tiers/platinum/benefits", srv.base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["benefits"].as_array().unwrap().len(), 8);

    let (status, body) = get_json(&client, format!("{}/tiers/diamond/benefits", srv.base_url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown_tier");

    let (status, body) = get_json(&client, format!("{}/tiers", srv.base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_awards_over_http_are_all_counted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        let url = srv.account_url(user, "/awards");
        tasks.push(tokio::spawn(async move {
            client
                .post(url)
                .json(&json!({
                    "points": 10,
                    "transaction_type": "ROUTINE_LOGGED",
                    "description": format!("log {i}")
                }))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::CREATED);
    }

    let (_, account) = get_json(&client, srv.account_url(user, "")).await;
    assert_eq!(account["points_balance"], 100);
    assert_eq!(account["lifetime_points"], 100);
}
