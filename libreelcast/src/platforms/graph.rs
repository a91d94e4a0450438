//! Minimal Graph API client shared by the Facebook and Instagram publishers

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::PlatformsConfig;
use crate::error::PlatformError;

/// Error object in a Graph API response body.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<i64>,
    pub error_subcode: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GraphError,
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    version: String,
}

impl GraphClient {
    pub fn new(config: &PlatformsConfig) -> crate::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PlatformError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            version: config.graph_version.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.version, path.trim_start_matches('/'))
    }

    /// POST form parameters to `path`, with the token as `access_token`.
    pub async fn post(
        &self,
        path: &str,
        params: &[(&str, String)],
        token: &SecretString,
    ) -> Result<Value, PlatformError> {
        let mut form: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        form.push(("access_token", token.expose_secret()));

        let resp = self
            .http
            .post(self.url(path))
            .form(&form)
            .send()
            .await
            .map_err(map_transport_error)?;

        read_response(resp).await
    }

    /// GET `path` with query parameters and `access_token`.
    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
        token: &SecretString,
    ) -> Result<Value, PlatformError> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("access_token", token.expose_secret()));

        let resp = self
            .http
            .get(self.url(path))
            .query(&query)
            .send()
            .await
            .map_err(map_transport_error)?;

        read_response(resp).await
    }

    /// `GET /{id}?fields=id`: succeeds only while the token can read the object.
    ///
    /// Anything other than a transport or throttling problem means the
    /// token cannot act for this account.
    pub async fn check_token(&self, remote_id: &str, token: &SecretString) -> Result<(), PlatformError> {
        match self.get(remote_id, &[("fields", "id")], token).await {
            Ok(_) => Ok(()),
            Err(e @ (PlatformError::Network(_) | PlatformError::RateLimit(_))) => Err(e),
            Err(PlatformError::InvalidCredential(msg)) | Err(PlatformError::Publishing(msg)) => {
                Err(PlatformError::InvalidCredential(msg))
            }
            Err(other) => Err(PlatformError::InvalidCredential(other.to_string())),
        }
    }
}

async fn read_response(resp: reqwest::Response) -> Result<Value, PlatformError> {
    let status = resp.status();
    let body = resp.text().await.map_err(map_transport_error)?;

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return Err(map_graph_error(status, Some(&envelope.error), &body));
    }

    if !status.is_success() {
        return Err(map_graph_error(status, None, &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        PlatformError::Publishing(format!("unexpected response body ({}): {}", e, body))
    })
}

/// Normalize a Graph API failure. Codes take precedence over HTTP status.
pub fn map_graph_error(status: StatusCode, error: Option<&GraphError>, body: &str) -> PlatformError {
    let message = match error {
        Some(e) => e.message.clone(),
        None if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        None => body.to_string(),
    };

    let code = error.and_then(|e| e.code);
    let oauth = error
        .and_then(|e| e.error_type.as_deref())
        .map(|t| t == "OAuthException")
        .unwrap_or(false);

    match code {
        Some(190) => return PlatformError::InvalidCredential(message),
        Some(4) | Some(17) | Some(32) | Some(613) => return PlatformError::RateLimit(message),
        _ => {}
    }

    match status.as_u16() {
        401 => PlatformError::InvalidCredential(message),
        429 => PlatformError::RateLimit(message),
        500..=599 => PlatformError::Network(message),
        _ if oauth && code.is_none() => PlatformError::InvalidCredential(message),
        _ => PlatformError::Publishing(message),
    }
}

fn map_transport_error(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Network(format!("request timed out: {}", e))
    } else if e.is_connect() {
        PlatformError::Network(format!("connection failed: {}", e))
    } else {
        PlatformError::Network(e.to_string())
    }
}

/// Extract a string id field from a Graph response.
pub fn string_field(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn graph_error(code: i64, error_type: &str) -> GraphError {
        GraphError {
            message: "msg".to_string(),
            error_type: Some(error_type.to_string()),
            code: Some(code),
            error_subcode: None,
        }
    }

    #[test]
    fn test_map_invalid_credential() {
        let e = map_graph_error(StatusCode::BAD_REQUEST, Some(&graph_error(190, "OAuthException")), "");
        assert!(matches!(e, PlatformError::InvalidCredential(_)));

        let e = map_graph_error(StatusCode::UNAUTHORIZED, None, "");
        assert!(matches!(e, PlatformError::InvalidCredential(_)));
    }

    #[test]
    fn test_map_rate_limits() {
        for code in [4, 17, 32, 613] {
            let e = map_graph_error(StatusCode::BAD_REQUEST, Some(&graph_error(code, "OAuthException")), "");
            assert!(matches!(e, PlatformError::RateLimit(_)), "code {}", code);
        }
        let e = map_graph_error(StatusCode::TOO_MANY_REQUESTS, None, "slow down");
        assert!(matches!(e, PlatformError::RateLimit(m) if m == "slow down"));
    }

    #[test]
    fn test_map_server_errors_are_network() {
        let e = map_graph_error(StatusCode::BAD_GATEWAY, None, "");
        assert!(matches!(e, PlatformError::Network(m) if m == "HTTP 502"));
    }

    #[test]
    fn test_map_other_errors_keep_message() {
        let error = GraphError {
            message: "(#9004) The media could not be fetched from this uri".to_string(),
            error_type: Some("OAuthException".to_string()),
            code: Some(9004),
            error_subcode: Some(2207052),
        };
        let e = map_graph_error(StatusCode::BAD_REQUEST, Some(&error), "");
        match e {
            PlatformError::Publishing(msg) => assert!(msg.contains("could not be fetched")),
            other => panic!("expected Publishing, got {:?}", other),
        }
    }

    #[test]
    fn test_string_field() {
        let value = json!({"id": "123", "num": 456, "obj": {}});
        assert_eq!(string_field(&value, "id").as_deref(), Some("123"));
        assert_eq!(string_field(&value, "num").as_deref(), Some("456"));
        assert!(string_field(&value, "obj").is_none());
        assert!(string_field(&value, "missing").is_none());
    }

    fn client_for(server: &MockServer) -> GraphClient {
        GraphClient::new(&PlatformsConfig {
            graph_base_url: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_check_token_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v18.0/1784"))
            .and(query_param("fields", "id"))
            .and(query_param("access_token", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1784"})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.check_token("1784", &SecretString::from("good")).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_token_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v18.0/1784"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Error validating access token: Session has expired",
                    "type": "OAuthException",
                    "code": 190
                }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.check_token("1784", &SecretString::from("expired")).await;
        assert!(matches!(result, Err(PlatformError::InvalidCredential(m)) if m.contains("expired")));
    }

    #[tokio::test]
    async fn test_error_in_success_status_is_still_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v18.0/x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"message": "Application request limit reached", "code": 4}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.get("x", &[], &SecretString::from("t")).await;
        assert!(matches!(result, Err(PlatformError::RateLimit(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        let client = GraphClient::new(&PlatformsConfig {
            graph_base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        let result = client.get("x", &[], &SecretString::from("t")).await;
        assert!(matches!(result, Err(PlatformError::Network(_))));
    }
}
