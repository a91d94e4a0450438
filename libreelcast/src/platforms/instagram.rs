//! Instagram Business publishing via the Graph API
//!
//! Publishing is two calls with an optional wait in between:
//! 1. `POST /{ig-user-id}/media` creates a media container
//! 2. for video and reels, poll `GET /{container}?fields=status_code` until
//!    the remote transcode reports `FINISHED`
//! 3. `POST /{ig-user-id}/media_publish` commits the container

use async_trait::async_trait;
use std::time::Duration;

use crate::config::PlatformsConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::graph::{string_field, GraphClient};
use crate::platforms::{validate_common, Publisher};
use crate::types::{Credential, MediaType, PlatformKind, PublishRequest};

const MAX_CAPTION_CHARS: usize = 2200;

pub struct InstagramPublisher {
    client: GraphClient,
    poll_interval: Duration,
    max_polls: u32,
}

impl InstagramPublisher {
    pub fn new(client: GraphClient, config: &PlatformsConfig) -> Self {
        Self {
            client,
            poll_interval: Duration::from_millis(config.processing_poll_interval_ms),
            max_polls: config.processing_max_attempts.max(1),
        }
    }

    async fn create_container(
        &self,
        credential: &Credential,
        request: &PublishRequest,
        media_url: &str,
    ) -> Result<String> {
        let mut params: Vec<(&str, String)> = match request.media_type {
            MediaType::Photo => vec![("image_url", media_url.to_string())],
            MediaType::Video => vec![
                ("media_type", "VIDEO".to_string()),
                ("video_url", media_url.to_string()),
            ],
            MediaType::Reel => vec![
                ("media_type", "REELS".to_string()),
                ("video_url", media_url.to_string()),
                ("share_to_feed", "true".to_string()),
            ],
        };
        params.push(("caption", request.caption.clone()));

        let path = format!("{}/media", credential.remote_id);
        let response = self
            .client
            .post(&path, &params, &credential.access_token)
            .await?;

        string_field(&response, "id").ok_or_else(|| {
            PlatformError::Publishing(format!("container response has no id: {}", response)).into()
        })
    }

    /// Poll the container until processing finishes.
    async fn wait_for_container(&self, credential: &Credential, container_id: &str) -> Result<()> {
        for attempt in 1..=self.max_polls {
            let response = self
                .client
                .get(container_id, &[("fields", "status_code")], &credential.access_token)
                .await?;

            let status = string_field(&response, "status_code").unwrap_or_default();
            tracing::debug!(container_id, attempt, status = %status, "Container status");

            match status.as_str() {
                "FINISHED" => return Ok(()),
                "ERROR" | "EXPIRED" => {
                    return Err(PlatformError::ProcessingError(format!(
                        "processing error: container {} reported {}",
                        container_id, status
                    ))
                    .into())
                }
                _ => {}
            }

            if attempt < self.max_polls {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(PlatformError::ProcessingTimeout(format!(
            "processing timeout: container {} not ready after {} checks",
            container_id, self.max_polls
        ))
        .into())
    }

    async fn publish_container(&self, credential: &Credential, container_id: &str) -> Result<String> {
        let path = format!("{}/media_publish", credential.remote_id);
        let response = self
            .client
            .post(&path, &[("creation_id", container_id.to_string())], &credential.access_token)
            .await?;

        string_field(&response, "id").ok_or_else(|| {
            PlatformError::Publishing(format!("publish response has no id: {}", response)).into()
        })
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Instagram
    }

    fn validate(&self, request: &PublishRequest) -> Result<()> {
        if request.media_url.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(PlatformError::Validation(
                "Instagram posts require a media URL".to_string(),
            )
            .into());
        }
        validate_common(request, MAX_CAPTION_CHARS)?;
        Ok(())
    }

    async fn check_credential(&self, credential: &Credential) -> Result<()> {
        self.client
            .check_token(&credential.remote_id, &credential.access_token)
            .await?;
        Ok(())
    }

    async fn publish(&self, credential: &Credential, request: &PublishRequest) -> Result<String> {
        self.validate(request)?;
        let media_url = request.media_url.as_deref().unwrap_or_default();

        let container_id = self.create_container(credential, request, media_url).await?;
        tracing::debug!(post_id = %request.post_id, container_id = %container_id, "Created media container");

        if request.media_type.requires_processing() {
            self.wait_for_container(credential, &container_id).await?;
        }

        self.publish_container(credential, &container_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReelcastError;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher_for(server: &MockServer, max_polls: u32) -> InstagramPublisher {
        let config = PlatformsConfig {
            graph_base_url: server.uri(),
            processing_poll_interval_ms: 1,
            processing_max_attempts: max_polls,
            ..Default::default()
        };
        InstagramPublisher::new(GraphClient::new(&config).unwrap(), &config)
    }

    fn credential() -> Credential {
        Credential {
            remote_id: "1784".to_string(),
            access_token: SecretString::from("ig-token"),
        }
    }

    fn request(media_type: MediaType, media_url: Option<&str>) -> PublishRequest {
        PublishRequest {
            post_id: "p1".to_string(),
            caption: "Fresh out of the oven".to_string(),
            media_url: media_url.map(String::from),
            media_type,
        }
    }

    #[tokio::test]
    async fn test_photo_publish_two_steps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media"))
            .and(body_string_contains("image_url=https%3A%2F%2Fcdn.example.com%2Fa.jpg"))
            .and(body_string_contains("access_token=ig-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media_publish"))
            .and(body_string_contains("creation_id=c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ig-post-9"})))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = publisher_for(&server, 3);
        let id = publisher
            .publish(&credential(), &request(MediaType::Photo, Some("https://cdn.example.com/a.jpg")))
            .await
            .unwrap();
        assert_eq!(id, "ig-post-9");
    }

    #[tokio::test]
    async fn test_reel_waits_for_processing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media"))
            .and(body_string_contains("media_type=REELS"))
            .and(body_string_contains("share_to_feed=true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v18.0/c-2"))
            .and(query_param("fields", "status_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status_code": "IN_PROGRESS"})))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v18.0/c-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status_code": "FINISHED"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media_publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "reel-1"})))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server, 5);
        let id = publisher
            .publish(&credential(), &request(MediaType::Reel, Some("https://cdn.example.com/r.mp4")))
            .await
            .unwrap();
        assert_eq!(id, "reel-1");
    }

    #[tokio::test]
    async fn test_processing_timeout_never_publishes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-3"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v18.0/c-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status_code": "IN_PROGRESS"})))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media_publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "never"})))
            .expect(0)
            .mount(&server)
            .await;

        let publisher = publisher_for(&server, 3);
        let result = publisher
            .publish(&credential(), &request(MediaType::Video, Some("https://cdn.example.com/v.mp4")))
            .await;
        assert!(matches!(
            result,
            Err(ReelcastError::Platform(PlatformError::ProcessingTimeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_processing_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-4"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v18.0/c-4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status_code": "ERROR"})))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server, 3);
        let result = publisher
            .publish(&credential(), &request(MediaType::Reel, Some("https://cdn.example.com/v.mp4")))
            .await;
        assert!(matches!(
            result,
            Err(ReelcastError::Platform(PlatformError::ProcessingError(_)))
        ));
    }

    #[tokio::test]
    async fn test_container_rejection_keeps_remote_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v18.0/1784/media"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Only photo or video can be accepted as media type.",
                    "type": "OAuthException",
                    "code": 9004
                }
            })))
            .mount(&server)
            .await;

        let publisher = publisher_for(&server, 3);
        let result = publisher
            .publish(&credential(), &request(MediaType::Photo, Some("https://cdn.example.com/a.gif")))
            .await;
        match result {
            Err(ReelcastError::Platform(PlatformError::Publishing(msg))) => {
                assert_eq!(msg, "Only photo or video can be accepted as media type.")
            }
            other => panic!("expected Publishing error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_media_fails_without_network() {
        let server = MockServer::start().await;
        let publisher = publisher_for(&server, 3);

        let result = publisher
            .publish(&credential(), &request(MediaType::Photo, None))
            .await;
        assert!(matches!(
            result,
            Err(ReelcastError::Platform(PlatformError::Validation(_)))
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
