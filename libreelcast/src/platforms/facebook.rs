//! Facebook Page publishing via the Graph API
//!
//! A single call per post: `/photos` for images, `/videos` for video and
//! reels, `/feed` for text-only posts.

use async_trait::async_trait;

use crate::error::{PlatformError, Result};
use crate::platforms::graph::{string_field, GraphClient};
use crate::platforms::{validate_common, Publisher};
use crate::types::{Credential, MediaType, PlatformKind, PublishRequest};

const MAX_CAPTION_CHARS: usize = 63_206;

pub struct FacebookPublisher {
    client: GraphClient,
}

impl FacebookPublisher {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    fn endpoint_and_params(page_id: &str, request: &PublishRequest) -> (String, Vec<(&'static str, String)>) {
        match (&request.media_url, request.media_type) {
            (Some(url), MediaType::Photo) => (
                format!("{}/photos", page_id),
                vec![("url", url.clone()), ("caption", request.caption.clone())],
            ),
            (Some(url), MediaType::Video | MediaType::Reel) => (
                format!("{}/videos", page_id),
                vec![("file_url", url.clone()), ("description", request.caption.clone())],
            ),
            (None, _) => (
                format!("{}/feed", page_id),
                vec![("message", request.caption.clone())],
            ),
        }
    }
}

#[async_trait]
impl Publisher for FacebookPublisher {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    fn validate(&self, request: &PublishRequest) -> Result<()> {
        if request.media_url.is_none() && request.caption.trim().is_empty() {
            return Err(PlatformError::Validation(
                "text-only Facebook posts need a caption".to_string(),
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

        let (path, params) = Self::endpoint_and_params(&credential.remote_id, request);
        let response = self
            .client
            .post(&path, &params, &credential.access_token)
            .await?;

        // Photo uploads return both; post_id is the feed story
        string_field(&response, "post_id")
            .or_else(|| string_field(&response, "id"))
            .ok_or_else(|| {
                PlatformError::Publishing(format!("response has no post id: {}", response)).into()
            })
    }
}
