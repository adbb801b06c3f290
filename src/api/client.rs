//! HTTP client for the credit and redemption-code endpoints.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::models::{
    CreateRedemptionCodes, CreatedCodes, CreditConfig, CreditLog, DeleteLogsResponse, ModelPrices,
    Page, RedemptionCode, Statistics, TradeTicket, UpdateRedemptionCode,
};

/// Errors from one collaborator request. Nothing is retried.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Non-2xx reply. `detail` is the body's `detail` field when present,
    /// otherwise the raw body.
    #[error("HTTP {status} from {url}: {detail}")]
    Http {
        status: u16,
        url: String,
        detail: String,
    },
    /// The request never produced a response.
    #[error("request to {url} failed: {detail}")]
    Network { url: String, detail: String },
    /// A 2xx body did not have the expected shape.
    #[error("unexpected response from {url}: {detail}")]
    Decode { url: String, detail: String },
    /// Rejected locally before sending.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    /// The server-provided message for HTTP errors.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Http { detail, .. } => Some(detail),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Pull a human-readable message out of an error body: the `detail` field
/// if the body is JSON and has one, else the trimmed body itself.
pub fn error_detail(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        match map.get("detail") {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(other) if !other.is_null() => return other.to_string(),
            _ => {}
        }
    }
    body.trim().to_string()
}

#[derive(Debug, Clone)]
pub struct CreditClientConfig {
    /// API root including the version prefix, e.g. `https://chat.example.com/api/v1`.
    pub base_url: String,
    /// Bearer token sent on every request.
    pub token: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl CreditClientConfig {
    /// Defaults: connect timeout 5 s, request timeout 30 s.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: String::new(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Typed wrapper over the credit REST API.
pub struct CreditClient {
    config: CreditClientConfig,
    http: reqwest::Client,
}

impl CreditClient {
    pub fn builder(base_url: impl Into<String>) -> CreditClientBuilder {
        CreditClientBuilder::new(base_url)
    }

    pub fn config(&self) -> &CreditClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url, "credit api request");
        self.http
            .request(method, url)
            .bearer_auth(&self.config.token)
    }

    async fn send(&self, req: RequestBuilder, url: &str) -> Result<Response, ApiError> {
        let resp = req.send().await.map_err(|e| ApiError::Network {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let detail = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            error_detail(&body)
        };
        warn!(status = status.as_u16(), url, %detail, "credit api error");
        Err(ApiError::Http {
            status: status.as_u16(),
            url: url.to_string(),
            detail,
        })
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder, url: &str) -> Result<T, ApiError> {
        let resp = self.send(req, url).await?;
        let bytes = resp.bytes().await.map_err(|e| ApiError::Network {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            detail: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let req = self.request(Method::GET, &url).query(query);
        self.json(req, &url).await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let req = self.request(method, &url).json(body);
        self.json(req, &url).await
    }

    // -- user endpoints ----------------------------------------------------

    pub async fn get_config(&self) -> Result<CreditConfig, ApiError> {
        self.get_json("/credit/config", &[]).await
    }

    /// The caller's own credit history. `None` returns the latest ten rows.
    pub async fn list_credit_logs(&self, page: Option<u32>) -> Result<Vec<CreditLog>, ApiError> {
        let query = optional(&[("page", page.map(|p| p.to_string()))]);
        self.get_json("/credit/logs", &query).await
    }

    /// Open a payment ticket for `amount` with the given payment method.
    pub async fn create_trade_ticket(
        &self,
        pay_type: &str,
        amount: f64,
    ) -> Result<TradeTicket, ApiError> {
        if amount.is_nan() || amount <= 0.0 {
            return Err(ApiError::Invalid(format!("amount must be positive, got {amount}")));
        }
        let body = serde_json::json!({ "pay_type": pay_type, "amount": amount });
        self.send_json(Method::POST, "/credit/tickets", &body).await
    }

    pub async fn receive_redemption_code(&self, code: &str) -> Result<(), ApiError> {
        let path = format!("/credit/redemption_codes/{}/receive", checked_code(code)?);
        let url = self.url(&path);
        self.send(self.request(Method::GET, &url), &url).await?;
        Ok(())
    }

    // -- admin endpoints ---------------------------------------------------

    pub async fn list_all_logs(
        &self,
        query: Option<&str>,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Page<CreditLog>, ApiError> {
        let params = optional(&[
            ("query", query.map(str::to_string)),
            ("page", page.map(|p| p.to_string())),
            ("limit", limit.map(|l| l.to_string())),
        ]);
        self.get_json("/credit/all_logs", &params).await
    }

    /// Delete every log row created before `timestamp` (unix seconds).
    pub async fn delete_logs(&self, timestamp: i64) -> Result<DeleteLogsResponse, ApiError> {
        if timestamp <= 0 {
            return Err(ApiError::Invalid("timestamp must be positive".into()));
        }
        let body = serde_json::json!({ "timestamp": timestamp });
        self.send_json(Method::DELETE, "/credit/logs", &body).await
    }

    pub async fn get_model_prices(&self) -> Result<ModelPrices, ApiError> {
        self.get_json("/credit/models/price", &[]).await
    }

    /// Returns the server's confirmation message.
    pub async fn update_model_prices(&self, prices: &ModelPrices) -> Result<String, ApiError> {
        self.send_json(Method::PUT, "/credit/models/price", prices).await
    }

    pub async fn get_statistics(&self, start_time: i64, end_time: i64) -> Result<Statistics, ApiError> {
        if end_time < start_time {
            return Err(ApiError::Invalid("end_time precedes start_time".into()));
        }
        let body = serde_json::json!({ "start_time": start_time, "end_time": end_time });
        self.send_json(Method::POST, "/credit/statistics", &body).await
    }

    pub async fn list_redemption_codes(
        &self,
        keyword: Option<&str>,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Page<RedemptionCode>, ApiError> {
        let params = optional(&[
            ("keyword", keyword.map(str::to_string)),
            ("page", page.map(|p| p.to_string())),
            ("limit", limit.map(|l| l.to_string())),
        ]);
        self.get_json("/credit/redemption_codes", &params).await
    }

    pub async fn create_redemption_codes(
        &self,
        form: &CreateRedemptionCodes,
    ) -> Result<CreatedCodes, ApiError> {
        form.validate().map_err(ApiError::Invalid)?;
        self.send_json(Method::POST, "/credit/redemption_codes", form).await
    }

    pub async fn update_redemption_code(
        &self,
        code: &str,
        form: &UpdateRedemptionCode,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("/credit/redemption_codes/{}", checked_code(code)?));
        let req = self.request(Method::PUT, &url).json(form);
        self.send(req, &url).await?;
        Ok(())
    }

    pub async fn delete_redemption_code(&self, code: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("/credit/redemption_codes/{}", checked_code(code)?));
        self.send(self.request(Method::DELETE, &url), &url).await?;
        Ok(())
    }

    /// CSV export of the codes matching `keyword`, header row included.
    pub async fn export_redemption_codes(&self, keyword: &str) -> Result<String, ApiError> {
        let url = self.url("/credit/redemption_codes/export");
        let req = self
            .request(Method::GET, &url)
            .query(&[("keyword", keyword)]);
        let resp = self.send(req, &url).await?;
        resp.text().await.map_err(|e| ApiError::Decode {
            url,
            detail: e.to_string(),
        })
    }
}

/// Drop unset query parameters.
fn optional<'a>(params: &[(&'a str, Option<String>)]) -> Vec<(&'a str, String)> {
    params
        .iter()
        .filter_map(|(k, v)| v.clone().map(|v| (*k, v)))
        .collect()
}

/// Codes are interpolated into the path, so only plain tokens are allowed.
fn checked_code(code: &str) -> Result<&str, ApiError> {
    if !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(code)
    } else {
        Err(ApiError::Invalid(format!("malformed redemption code {code:?}")))
    }
}

/// Builder for [`CreditClient`].
pub struct CreditClientBuilder {
    config: CreditClientConfig,
}

impl CreditClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: CreditClientConfig::new(base_url),
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = token.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// # Errors
    /// Returns [`ApiError::Invalid`] when no token was set.
    pub fn build(self) -> Result<CreditClient, ApiError> {
        if self.config.token.trim().is_empty() {
            return Err(ApiError::Invalid("an API token is required".into()));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .unwrap_or_default();
        Ok(CreditClient {
            config: self.config,
            http,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"detail":"Redemption code not found."}"#, "Redemption code not found.")]
    #[case(r#"{"detail":[{"msg":"field required"}]}"#, r#"[{"msg":"field required"}]"#)]
    #[case(r#"{"error":"x"}"#, r#"{"error":"x"}"#)]
    #[case("Internal Server Error\n", "Internal Server Error")]
    fn detail_extraction(#[case] body: &str, #[case] expected: &str) {
        assert_eq!(error_detail(body), expected);
    }

    #[test]
    fn builder_requires_token() {
        let err = CreditClient::builder("http://localhost").build().err().unwrap();
        assert!(matches!(err, ApiError::Invalid(_)));
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let client = CreditClient::builder("http://localhost/api/v1/")
            .token("t")
            .build()
            .unwrap();
        assert_eq!(client.url("/credit/config"), "http://localhost/api/v1/credit/config");
    }

    #[test]
    fn optional_drops_unset() {
        let q = optional(&[("page", Some("2".into())), ("limit", None)]);
        assert_eq!(q, vec![("page", "2".to_string())]);
    }

    #[rstest]
    #[case("abc123", true)]
    #[case("a-b_c", true)]
    #[case("", false)]
    #[case("../admin", false)]
    #[case("a b", false)]
    fn code_validation(#[case] code: &str, #[case] ok: bool) {
        assert_eq!(checked_code(code).is_ok(), ok);
    }

    #[test]
    fn error_accessors() {
        let e = ApiError::Http {
            status: 404,
            url: "u".into(),
            detail: "missing".into(),
        };
        assert_eq!(e.status(), Some(404));
        assert_eq!(e.detail(), Some("missing"));
        assert_eq!(ApiError::Invalid("x".into()).detail(), None);
    }
}
