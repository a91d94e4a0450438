//! Platform publishers
//!
//! A [`Publisher`] knows one platform's publish protocol. The engine looks
//! publishers up by [`PlatformKind`] in a [`PublisherRegistry`] and never
//! branches on the platform itself, so adding a platform means adding a
//! publisher and registering it.
//!
//! ```no_run
//! use libreelcast::config::PlatformsConfig;
//! use libreelcast::platforms::PublisherRegistry;
//! use libreelcast::types::PlatformKind;
//!
//! # fn example() -> libreelcast::Result<()> {
//! let registry = PublisherRegistry::from_config(&PlatformsConfig::default())?;
//! assert!(registry.get(PlatformKind::Instagram).is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PlatformsConfig;
use crate::error::{PlatformError, Result};
use crate::types::{Credential, PlatformKind, PublishRequest};

pub mod facebook;
pub mod graph;
pub mod instagram;

// Available in all builds so integration tests and dry runs can use it
pub mod mock;

/// One platform's publish protocol.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Local checks that need no network access.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Validation` when the request can never succeed
    /// on this platform (missing media, caption too long).
    fn validate(&self, request: &PublishRequest) -> Result<()>;

    /// Confirm the credential is still accepted by the platform.
    ///
    /// # Errors
    ///
    /// `PlatformError::InvalidCredential` for a rejected token; transport
    /// problems surface as `PlatformError::Network`.
    async fn check_credential(&self, credential: &Credential) -> Result<()>;

    /// Run the full publish protocol and return the remote post id.
    async fn publish(&self, credential: &Credential, request: &PublishRequest) -> Result<String>;
}

/// Publishers by platform.
#[derive(Clone, Default)]
pub struct PublisherRegistry {
    publishers: HashMap<PlatformKind, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Graph API publishers for Facebook and Instagram.
    pub fn from_config(config: &PlatformsConfig) -> Result<Self> {
        let client = graph::GraphClient::new(config)?;

        let mut registry = Self::new();
        registry.register(Arc::new(facebook::FacebookPublisher::new(client.clone())));
        registry.register(Arc::new(instagram::InstagramPublisher::new(client, config)));
        Ok(registry)
    }

    /// Register a publisher, replacing any previous one for the same platform.
    pub fn register(&mut self, publisher: Arc<dyn Publisher>) {
        self.publishers.insert(publisher.kind(), publisher);
    }

    pub fn get(&self, kind: PlatformKind) -> Option<Arc<dyn Publisher>> {
        self.publishers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<PlatformKind> {
        self.publishers.keys().copied().collect()
    }
}

/// Shared checks on caption length and media URL shape.
pub(crate) fn validate_common(
    request: &PublishRequest,
    max_caption_chars: usize,
) -> std::result::Result<(), PlatformError> {
    let chars = request.caption.chars().count();
    if chars > max_caption_chars {
        return Err(PlatformError::Validation(format!(
            "caption is {} characters, limit is {}",
            chars, max_caption_chars
        )));
    }

    if let Some(url) = &request.media_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(PlatformError::Validation(format!(
                "media URL must be publicly reachable over HTTP(S): {}",
                url
            )));
        }
    }

    Ok(())
}
