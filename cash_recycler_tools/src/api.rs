use std::sync::Arc;

use log::*;
use pos_common::{MinorUnits, Secret};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    data_objects::{LoginRequest, LoginResponse},
    helpers::parse_json_or_default,
    ActiveTransaction,
    CashRecyclerConfig,
    CashRecyclerError,
    LastTransaction,
    SettleRequest,
    StartPaymentRequest,
    StartPaymentResponse,
};

pub const LOGIN_PATH: &str = "/api/login";
pub const START_PATH: &str = "/api/transactions/start";
pub const ACTIVE_PATH: &str = "/api/transactions/active";
pub const LAST_PATH: &str = "/api/transactions/last";
pub const FINISH_PATH: &str = "/api/transactions/finish";
pub const CANCEL_PATH: &str = "/api/transactions/cancel";

/// HTTPS client for a single cash recycler.
///
/// Cloning is cheap and clones share the cached bearer token, so concurrent sessions reuse one login.
#[derive(Clone)]
pub struct CashRecyclerClient {
    config: CashRecyclerConfig,
    client: Arc<Client>,
    token: Arc<RwLock<Option<Secret<String>>>>,
}

impl CashRecyclerClient {
    pub fn new(config: CashRecyclerConfig) -> Result<Self, CashRecyclerError> {
        let mut headers = HeaderMap::with_capacity(1);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if config.accept_invalid_certs {
            debug!("💵️ TLS certificate validation is disabled for {}", config.base_url);
        }
        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| CashRecyclerError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client), token: Arc::new(RwLock::new(None)) })
    }

    pub fn config(&self) -> &CashRecyclerConfig {
        &self.config
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Exchanges the configured credentials for a bearer token and caches it.
    pub async fn login(&self) -> Result<Secret<String>, CashRecyclerError> {
        let body = LoginRequest { username: &self.config.username, password: self.config.password.reveal() };
        let url = self.url(LOGIN_PATH);
        debug!("💵️ Logging in to cash recycler at {url} as {}", self.config.username);
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CashRecyclerError::RequestError(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| CashRecyclerError::ResponseError(e.to_string()))?;
        if !status.is_success() {
            return Err(CashRecyclerError::AuthenticationFailed(format!("Error {}. {text}", status.as_u16())));
        }
        let login: LoginResponse = parse_json_or_default(&text)?;
        if login.token.is_empty() {
            return Err(CashRecyclerError::AuthenticationFailed("The login response did not contain a token".into()));
        }
        let token = Secret::new(login.token);
        *self.token.write().await = Some(token.clone());
        info!("💵️ Logged in to cash recycler at {}", self.config.base_url);
        Ok(token)
    }

    pub async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    async fn bearer_token(&self) -> Result<Secret<String>, CashRecyclerError> {
        let cached = self.token.read().await.clone();
        match cached {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    /// POSTs `body` to `path` with the cached bearer token. If the machine rejects the token, logs in once more and
    /// replays the request once.
    pub async fn authorized_post<T, B>(&self, path: &str, body: &B) -> Result<T, CashRecyclerError>
    where
        T: DeserializeOwned + Default,
        B: Serialize + ?Sized,
    {
        let token = self.bearer_token().await?;
        match self.post_with_token(path, body, &token).await {
            Err(e) if e.is_unauthorized() => {
                debug!("💵️ Token rejected by the cash recycler ({e}). Logging in again.");
                self.clear_token().await;
                let token = self.login().await?;
                self.post_with_token(path, body, &token).await
            },
            result => result,
        }
    }

    async fn post_with_token<T, B>(&self, path: &str, body: &B, token: &Secret<String>) -> Result<T, CashRecyclerError>
    where
        T: DeserializeOwned + Default,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        trace!("💵️ POST {url}");
        let response = self
            .client
            .post(url)
            .bearer_auth(token.reveal())
            .json(body)
            .send()
            .await
            .map_err(|e| CashRecyclerError::RequestError(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| CashRecyclerError::ResponseError(e.to_string()))?;
        if status.is_success() {
            trace!("💵️ {path} responded {status}: {text}");
            parse_json_or_default(&text)
        } else {
            Err(CashRecyclerError::QueryError { status: status.as_u16(), message: text })
        }
    }

    /// Asks the machine to collect `amount`. Returns as soon as the machine accepts the request.
    pub async fn start_payment(
        &self,
        amount: MinorUnits,
        reference: &str,
    ) -> Result<StartPaymentResponse, CashRecyclerError> {
        let request = StartPaymentRequest { amount, reference: reference.to_string(), queueing_allowed: true };
        debug!("💵️ Starting cash payment {reference} for {amount} {}", self.config.currency);
        self.authorized_post(START_PATH, &request).await
    }

    pub async fn active_transaction(&self) -> Result<ActiveTransaction, CashRecyclerError> {
        self.authorized_post(ACTIVE_PATH, &serde_json::json!({})).await
    }

    pub async fn last_transaction(&self) -> Result<LastTransaction, CashRecyclerError> {
        self.authorized_post(LAST_PATH, &serde_json::json!({})).await
    }

    /// Commits the payment identified by `reference`.
    pub async fn finish_payment(&self, reference: &str) -> Result<(), CashRecyclerError> {
        self.authorized_post::<Value, _>(FINISH_PATH, &SettleRequest { reference }).await.map(|_| ())
    }

    pub async fn cancel_payment(&self, reference: &str) -> Result<(), CashRecyclerError> {
        self.authorized_post::<Value, _>(CANCEL_PATH, &SettleRequest { reference }).await.map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, body_partial_json, header, method, path},
        Mock,
        MockServer,
        ResponseTemplate,
    };

    use super::*;
    use crate::OperationStatus;

    fn client_for(server: &MockServer) -> CashRecyclerClient {
        let config = CashRecyclerConfig::new(&server.uri(), "operator", "s3cret");
        CashRecyclerClient::new(config).expect("Could not build client")
    }

    fn ok_json(body: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(body)
    }

    async fn login_returns(server: &MockServer, token: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ok_json(json!({ "token": token })))
            .up_to_n_times(times)
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn login_once_and_reuse_token() {
        let _ = env_logger::try_init();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_json(json!({ "username": "operator", "password": "s3cret" })))
            .respond_with(ok_json(json!({ "token": "abc" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ACTIVE_PATH))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ok_json(json!({ "operation": "RUNNING", "requested": 500, "inserted": 100 })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ACTIVE_PATH))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ok_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let active = client.active_transaction().await.expect("first poll failed");
        assert_eq!(active.operation, OperationStatus::Busy("RUNNING".into()));
        assert_eq!(active.inserted, Some(100.into()));
        let active = client.active_transaction().await.expect("second poll failed");
        assert!(active.operation.is_idle());
    }

    #[tokio::test]
    async fn relogin_once_when_token_is_rejected() {
        let _ = env_logger::try_init();
        let server = MockServer::start().await;
        login_returns(&server, "old", 1).await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ok_json(json!({ "accessToken": "new" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(START_PATH))
            .and(header("authorization", "Bearer old"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(START_PATH))
            .and(header("authorization", "Bearer new"))
            .and(body_partial_json(json!({ "amount": 500, "reference": "POS-1", "queueingAllowed": true })))
            .respond_with(ok_json(json!({ "transactionId": "T-9" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let started = client.start_payment(500.into(), "POS-1").await.expect("start failed");
        assert_eq!(started.transaction_id.as_deref(), Some("T-9"));
    }

    #[tokio::test]
    async fn second_rejection_is_returned() {
        let server = MockServer::start().await;
        login_returns(&server, "a", 1).await;
        login_returns(&server, "b", 1).await;
        Mock::given(method("POST"))
            .and(path(CANCEL_PATH))
            .respond_with(ResponseTemplate::new(403).set_body_string("no"))
            .expect(2)
            .mount(&server)
            .await;
        let client = client_for(&server);
        let err = client.cancel_payment("POS-1").await.expect_err("cancel should fail");
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn failed_login_is_an_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let client = client_for(&server);
        let err = client.last_transaction().await.expect_err("should fail");
        assert!(matches!(err, CashRecyclerError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn finish_accepts_empty_body() {
        let server = MockServer::start().await;
        login_returns(&server, "t", 1).await;
        Mock::given(method("POST"))
            .and(path(FINISH_PATH))
            .and(body_json(json!({ "reference": "POS-7" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let client = client_for(&server);
        client.finish_payment("POS-7").await.expect("finish failed");
    }

    #[test]
    fn urls_are_joined_cleanly() {
        let config = CashRecyclerConfig::new("https://10.0.0.20/", "u", "p");
        let client = CashRecyclerClient::new(config).unwrap();
        assert_eq!(client.url(ACTIVE_PATH), "https://10.0.0.20/api/transactions/active");
    }
}
