//! End-to-end recovery loops against a fake Qwen endpoint (spec §4.7 step
//! 4: 401→forced-refresh→retry, 429→rotate→retry), in the teacher's
//! top-level `tests/` + `wiremock` style (e.g.
//! `tests/service_account_provider_test.rs`).

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use relay_accounts::AccountManager;
use relay_core::{HostHttpRequest, RelayError, SecretStore};
use relay_gateway::{Orchestrator, RelayConfig, ReqwestHttpClient};
use relay_oauth::{OAuthRefresher, Tokens};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct InMemorySecretStore {
    value: StdMutex<Option<Vec<u8>>>,
}

impl InMemorySecretStore {
    fn new() -> Self {
        Self { value: StdMutex::new(None) }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, RelayError> {
        Ok(self.value.lock().unwrap().clone())
    }

    async fn set(&self, _key: &str, value: Vec<u8>) -> Result<(), RelayError> {
        *self.value.lock().unwrap() = Some(value);
        Ok(())
    }
}

struct StubRefresher {
    new_access_token: String,
}

#[async_trait]
impl OAuthRefresher for StubRefresher {
    async fn refresh(&self, refresh_token: &str, _project_id: Option<&str>) -> Result<Tokens, RelayError> {
        Ok(Tokens {
            access_token: self.new_access_token.clone(),
            refresh_token: refresh_token.to_string(),
            expires_at: i64::MAX,
            project_id: None,
            email: None,
        })
    }
}

async fn orchestrator_with_one_account(
    server_uri: &str,
    access_token: &str,
    new_access_token: &str,
) -> Orchestrator {
    let secret_store = Arc::new(InMemorySecretStore::new());
    let refresher = Arc::new(StubRefresher { new_access_token: new_access_token.to_string() });
    let accounts = AccountManager::initialize(secret_store, refresher, "test-key").await.unwrap();
    accounts
        .add_account(
            Tokens {
                access_token: access_token.to_string(),
                refresh_token: "refresh-1".to_string(),
                expires_at: i64::MAX,
                project_id: None,
                email: Some("one@example.com".to_string()),
            },
            0,
        )
        .await
        .unwrap();

    let config = RelayConfig { qwen_base_url: server_uri.to_string(), ..RelayConfig::default() };
    let http = Arc::new(ReqwestHttpClient::default());
    Orchestrator::new(Arc::new(accounts), http, config)
}

async fn orchestrator_with_two_accounts(server_uri: &str, token_a: &str, token_b: &str) -> Orchestrator {
    let secret_store = Arc::new(InMemorySecretStore::new());
    let refresher = Arc::new(StubRefresher { new_access_token: token_a.to_string() });
    let accounts = AccountManager::initialize(secret_store, refresher, "test-key").await.unwrap();
    for (token, email) in [(token_a, "a@example.com"), (token_b, "b@example.com")] {
        accounts
            .add_account(
                Tokens {
                    access_token: token.to_string(),
                    refresh_token: format!("refresh-{email}"),
                    expires_at: i64::MAX,
                    project_id: None,
                    email: Some(email.to_string()),
                },
                0,
            )
            .await
            .unwrap();
    }
    let config = RelayConfig { qwen_base_url: server_uri.to_string(), ..RelayConfig::default() };
    let http = Arc::new(ReqwestHttpClient::default());
    Orchestrator::new(Arc::new(accounts), http, config)
}

fn qwen_request(url: String) -> HostHttpRequest {
    let body = serde_json::json!({
        "model": "qwen-max",
        "stream": false,
        "messages": [{ "role": "user", "content": "hi" }],
    });
    HostHttpRequest {
        method: "POST".to_string(),
        url,
        headers: Vec::new(),
        body: serde_json::to_vec(&body).unwrap(),
    }
}

fn completion_body() -> serde_json::Value {
    serde_json::json!({
        "choices": [{ "message": { "content": "hello", "tool_calls": [] } }],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 },
    })
}

#[tokio::test]
async fn expired_token_is_force_refreshed_and_the_call_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer stale-token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({ "error": "expired" })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .mount(&server)
        .await;

    let orchestrator = orchestrator_with_one_account(&server.uri(), "stale-token", "fresh-token").await;
    let url = format!("{}/chat/completions", server.uri());
    let response = orchestrator.handle(qwen_request(url), 0).await.unwrap();

    assert_eq!(response.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["output"][0]["content"][0]["text"], "hello");
}

#[tokio::test]
async fn repeated_401_after_refresh_surfaces_reauthentication_required() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({ "error": "expired" })))
        .mount(&server)
        .await;

    let orchestrator = orchestrator_with_one_account(&server.uri(), "stale-token", "still-bad-token").await;
    let url = format!("{}/chat/completions", server.uri());
    let err = orchestrator.handle(qwen_request(url), 0).await.unwrap_err();

    assert!(matches!(err, RelayError::ReauthenticationRequired(_)));
}

#[tokio::test]
async fn rotates_to_the_other_account_on_429_and_completes_there() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator_with_two_accounts(&server.uri(), "access-1", "access-2").await;
    let url = format!("{}/chat/completions", server.uri());
    let response = orchestrator.handle(qwen_request(url), 0).await.unwrap();

    assert_eq!(response.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["output"][0]["content"][0]["text"], "hello");
}

#[tokio::test]
async fn rate_limited_response_with_single_account_synthesizes_429() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "30")
                .set_body_json(serde_json::json!({ "error": "rate limited" })),
        )
        .mount(&server)
        .await;

    let orchestrator = orchestrator_with_one_account(&server.uri(), "tok", "tok").await;
    let url = format!("{}/chat/completions", server.uri());
    let response = orchestrator.handle(qwen_request(url), 0).await.unwrap();

    assert_eq!(response.status, 429);
    assert!(response.headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("retry-after")));
}
