//! HTTP calls made by the CLI.

use std::error::Error as _;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use super::CliError;
use crate::http_client::build_http_client;

pub const CLI_CLIENT_ID: &str = "nixopus-cli";
const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
/// Added to the poll interval each time the server answers `slow_down`.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeviceTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApiKeyValidation {
    pub valid: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CliInitRequest {
    pub api_key: String,
    pub name: String,
    pub repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_variables: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CliInitResponse {
    pub project_id: String,
    pub family_id: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct OauthError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

enum PollOutcome {
    Tokens(DeviceTokens),
    Pending,
    SlowDown,
}

pub struct ApiClient {
    http: Client,
    server: String,
    slow_down_step: Duration,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<Self, CliError> {
        let http = build_http_client().map_err(|e| translate_transport_error(&e))?;
        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
            slow_down_step: SLOW_DOWN_STEP,
        })
    }

    pub fn with_slow_down_step(mut self, step: Duration) -> Self {
        self.slow_down_step = step;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    async fn post_envelope<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<T, CliError> {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| translate_transport_error(&e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| translate_transport_error(&e))?;

        let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(|_| CliError::Api {
            status: status.as_u16(),
            message: "unexpected response from server".to_string(),
        })?;
        if !status.is_success() {
            return Err(CliError::Api {
                status: status.as_u16(),
                message: envelope.message,
            });
        }
        envelope.data.ok_or_else(|| CliError::Api {
            status: status.as_u16(),
            message: "response had no data".to_string(),
        })
    }

    pub async fn validate_api_key(&self, api_key: &str) -> Result<ApiKeyValidation, CliError> {
        self.post_envelope(
            "/api/v1/auth/validate-api-key",
            None,
            &serde_json::json!({ "api_key": api_key }),
        )
        .await
    }

    pub async fn cli_init(&self, request: &CliInitRequest) -> Result<CliInitResponse, CliError> {
        self.post_envelope("/api/v1/auth/cli-init", None, request)
            .await
    }

    /// Register another application in the family, returning its record.
    pub async fn add_to_family(&self, api_key: &str, body: &Value) -> Result<Value, CliError> {
        self.post_envelope(
            "/api/v1/deploy/application/project/add-to-family",
            Some(api_key),
            body,
        )
        .await
    }

    pub async fn request_device_code(&self, client_id: &str) -> Result<DeviceCode, CliError> {
        let response = self
            .http
            .post(self.url("/api/auth/device/code"))
            .json(&serde_json::json!({ "client_id": client_id }))
            .send()
            .await
            .map_err(|e| translate_transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            return Err(oauth_failure(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| translate_transport_error(&e))
    }

    async fn poll_once(&self, client_id: &str, device_code: &str) -> Result<PollOutcome, CliError> {
        let response = self
            .http
            .post(self.url("/api/auth/device/token"))
            .json(&serde_json::json!({
                "grant_type": DEVICE_CODE_GRANT_TYPE,
                "device_code": device_code,
                "client_id": client_id,
            }))
            .send()
            .await
            .map_err(|e| translate_transport_error(&e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| translate_transport_error(&e))?;

        if status.is_success() {
            return serde_json::from_slice(&bytes)
                .map(PollOutcome::Tokens)
                .map_err(|_| CliError::DeviceLogin("unexpected token response".to_string()));
        }
        match serde_json::from_slice::<OauthError>(&bytes) {
            Ok(err) => match err.error.as_str() {
                "authorization_pending" => Ok(PollOutcome::Pending),
                "slow_down" => Ok(PollOutcome::SlowDown),
                "expired_token" => Err(CliError::DeviceCodeExpired),
                "access_denied" => Err(CliError::AccessDenied),
                other => Err(CliError::DeviceLogin(
                    err.error_description.unwrap_or_else(|| other.to_string()),
                )),
            },
            Err(_) => Err(oauth_failure(status, &bytes)),
        }
    }

    /// Poll the token endpoint until the grant resolves or `expires_in` passes.
    pub async fn wait_for_device_token(
        &self,
        client_id: &str,
        code: &DeviceCode,
    ) -> Result<DeviceTokens, CliError> {
        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval);

        loop {
            if Instant::now() + interval >= deadline {
                return Err(CliError::DeviceCodeExpired);
            }
            tokio::time::sleep(interval).await;
            match self.poll_once(client_id, &code.device_code).await? {
                PollOutcome::Tokens(tokens) => return Ok(tokens),
                PollOutcome::Pending => {}
                PollOutcome::SlowDown => interval += self.slow_down_step,
            }
        }
    }
}

fn oauth_failure(status: StatusCode, body: &[u8]) -> CliError {
    let message = serde_json::from_slice::<OauthError>(body)
        .ok()
        .map(|e| e.error_description.unwrap_or(e.error))
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));
    CliError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Map a transport failure to a message that does not expose library internals.
pub fn translate_transport_error(error: &reqwest::Error) -> CliError {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        chain.push_str(": ");
        chain.push_str(&err.to_string());
        source = err.source();
    }
    if error.is_timeout() {
        return CliError::Transport(TIMEOUT_MESSAGE.to_string());
    }
    if error.is_builder() && chain.to_lowercase().contains("scheme") {
        return CliError::Transport(SCHEME_MESSAGE.to_string());
    }
    CliError::Transport(translate_transport_message(&chain))
}

const SCHEME_MESSAGE: &str = "invalid server URL: it must start with http:// or https://";
const TIMEOUT_MESSAGE: &str = "the server took too long to respond; try again later";

pub fn translate_transport_message(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let message = if lower.contains("unsupported protocol scheme")
        || lower.contains("url scheme is not allowed")
        || lower.contains("relative url without a base")
    {
        SCHEME_MESSAGE
    } else if lower.contains("no such host")
        || lower.contains("dns error")
        || lower.contains("failed to lookup address")
    {
        "could not resolve the server host; check the server address"
    } else if lower.contains("connection refused") {
        "connection refused: is the server running?"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        TIMEOUT_MESSAGE
    } else if lower.contains("unreachable") {
        "the server is unreachable; check your network connection"
    } else {
        "could not connect to the server"
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn code(interval: u64, expires_in: u64) -> DeviceCode {
        DeviceCode {
            device_code: "dev-code".into(),
            user_code: "ABCD1234".into(),
            verification_uri: "http://localhost/device".into(),
            verification_uri_complete: None,
            expires_in,
            interval,
        }
    }

    #[test]
    fn transport_messages_are_translated() {
        assert_eq!(
            translate_transport_message("Get \"ftp://x\": unsupported protocol scheme \"ftp\""),
            SCHEME_MESSAGE
        );
        assert!(translate_transport_message("dial tcp: lookup api.invalid: no such host")
            .contains("resolve"));
        assert!(translate_transport_message("tcp connect error: Connection refused (os error 111)")
            .contains("refused"));
        assert_eq!(translate_transport_message("operation timed out"), TIMEOUT_MESSAGE);
        assert!(translate_transport_message("Network is unreachable").contains("unreachable"));
        assert!(!translate_transport_message("hyper::Error(Io, 10.0.0.1)").contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn refused_connection_is_translated() {
        let client = ApiClient::new("http://127.0.0.1:1").unwrap();
        let err = client.validate_api_key("nixopus_x").await.unwrap_err();
        match err {
            CliError::Transport(message) => assert!(!message.contains("127.0.0.1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn validate_api_key_reads_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/validate-api-key"))
            .and(body_partial_json(serde_json::json!({"api_key": "nixopus_abcdefgh_x"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "message": "API key is valid",
                "data": {"valid": true}
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let result = client.validate_api_key("nixopus_abcdefgh_x").await.unwrap();
        assert!(result.valid);
    }

    #[tokio::test]
    async fn api_errors_surface_the_envelope_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/cli-init"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "status": "error",
                "message": "API key has been revoked",
                "data": null
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client
            .cli_init(&CliInitRequest {
                api_key: "nixopus_abcdefgh_x".into(),
                name: "web".into(),
                repository: "https://github.com/acme/web".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Api { status: 401, ref message } if message == "API key has been revoked"));
    }

    #[tokio::test]
    async fn device_login_waits_through_pending_and_slow_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/device/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "authorization_pending"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/device/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "slow_down"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/device/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "jwt",
                "refresh_token": "refresh",
                "token_type": "Bearer",
                "expires_in": 900
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri())
            .unwrap()
            .with_slow_down_step(Duration::from_millis(20));
        let tokens = client
            .wait_for_device_token(CLI_CLIENT_ID, &code(0, 60))
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "jwt");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn device_login_gives_up_before_the_code_expires() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/device/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "slow_down"})),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri())
            .unwrap()
            .with_slow_down_step(Duration::from_secs(1));
        let started = Instant::now();
        let err = client
            .wait_for_device_token(CLI_CLIENT_ID, &code(1, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::DeviceCodeExpired));
        // One poll at ~1s widens the interval to 2s, which would land past
        // the 3s lifetime, so no second poll is made.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert!(started.elapsed() < Duration::from_secs(3));

        let err = client
            .wait_for_device_token(CLI_CLIENT_ID, &code(5, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::DeviceCodeExpired));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn device_login_stops_on_expired_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/device/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({
                    "error": "expired_token",
                    "error_description": "The device code has expired"
                })),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client
            .wait_for_device_token(CLI_CLIENT_ID, &code(0, 60))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::DeviceCodeExpired));
        assert_eq!(err.to_string(), "device code expired");
    }

    #[tokio::test]
    async fn device_login_respects_the_local_deadline() {
        let client = ApiClient::new("http://127.0.0.1:1").unwrap();
        let err = client
            .wait_for_device_token(CLI_CLIENT_ID, &code(5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::DeviceCodeExpired));
    }
}
