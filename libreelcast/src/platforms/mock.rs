//! Configurable in-memory publisher
//!
//! Simulates successes, failures, slow networks and stuck media processing
//! without credentials or network access. Tests keep an `Arc` to the mock
//! and read its counters after dispatching through the engine.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{PlatformError, Result};
use crate::platforms::Publisher;
use crate::types::{Credential, PlatformKind, PublishRequest};

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub kind: PlatformKind,
    /// Error returned by `publish`, if any.
    pub publish_error: Option<PlatformError>,
    /// Number of leading `publish` calls that fail before succeeding.
    /// `None` means every call fails when `publish_error` is set.
    pub failures_before_success: Option<usize>,
    /// Error returned by `check_credential`, if any.
    pub credential_error: Option<PlatformError>,
    /// Simulated latency of `publish`.
    pub delay: Duration,
    /// Require a media URL, as Instagram does.
    pub require_media: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            kind: PlatformKind::Instagram,
            publish_error: None,
            failures_before_success: None,
            credential_error: None,
            delay: Duration::ZERO,
            require_media: false,
        }
    }
}

pub struct MockPublisher {
    config: MockConfig,
    publish_calls: AtomicUsize,
    credential_checks: AtomicUsize,
    published: Mutex<Vec<PublishRequest>>,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            publish_calls: AtomicUsize::new(0),
            credential_checks: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn success(kind: PlatformKind) -> Self {
        Self::new(MockConfig {
            kind,
            ..Default::default()
        })
    }

    /// Every publish fails with `error`.
    pub fn failing(kind: PlatformKind, error: PlatformError) -> Self {
        Self::new(MockConfig {
            kind,
            publish_error: Some(error),
            ..Default::default()
        })
    }

    /// The first `failures` publishes fail with `error`, later ones succeed.
    pub fn flaky(kind: PlatformKind, error: PlatformError, failures: usize) -> Self {
        Self::new(MockConfig {
            kind,
            publish_error: Some(error),
            failures_before_success: Some(failures),
            ..Default::default()
        })
    }

    pub fn with_delay(kind: PlatformKind, delay: Duration) -> Self {
        Self::new(MockConfig {
            kind,
            delay,
            ..Default::default()
        })
    }

    /// Media that never finishes processing on the remote side.
    pub fn stuck_processing(kind: PlatformKind) -> Self {
        Self::failing(
            kind,
            PlatformError::ProcessingTimeout("processing timeout".to_string()),
        )
    }

    pub fn rejecting_credentials(kind: PlatformKind) -> Self {
        Self::new(MockConfig {
            kind,
            credential_error: Some(PlatformError::InvalidCredential(
                "Error validating access token: Session has expired".to_string(),
            )),
            ..Default::default()
        })
    }

    pub fn publish_call_count(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn credential_check_count(&self) -> usize {
        self.credential_checks.load(Ordering::SeqCst)
    }

    /// Requests that were published successfully, in completion order.
    pub fn published(&self) -> Vec<PublishRequest> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn kind(&self) -> PlatformKind {
        self.config.kind
    }

    fn validate(&self, request: &PublishRequest) -> Result<()> {
        if self.config.require_media && request.media_url.is_none() {
            return Err(PlatformError::Validation("media URL required".to_string()).into());
        }
        Ok(())
    }

    async fn check_credential(&self, _credential: &Credential) -> Result<()> {
        self.credential_checks.fetch_add(1, Ordering::SeqCst);
        match &self.config.credential_error {
            Some(e) => Err(e.clone().into()),
            None => Ok(()),
        }
    }

    async fn publish(&self, _credential: &Credential, request: &PublishRequest) -> Result<String> {
        let call = self.publish_calls.fetch_add(1, Ordering::SeqCst);

        if !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }

        self.validate(request)?;

        if let Some(error) = &self.config.publish_error {
            let fails = match self.config.failures_before_success {
                Some(n) => call < n,
                None => true,
            };
            if fails {
                return Err(error.clone().into());
            }
        }

        if let Ok(mut published) = self.published.lock() {
            published.push(request.clone());
        }
        Ok(format!("mock-{}-{}", self.config.kind, request.post_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReelcastError;
    use crate::types::MediaType;
    use secrecy::SecretString;

    fn credential() -> Credential {
        Credential {
            remote_id: "1".to_string(),
            access_token: SecretString::from("t"),
        }
    }

    fn request() -> PublishRequest {
        PublishRequest {
            post_id: "p1".to_string(),
            caption: "hi".to_string(),
            media_url: None,
            media_type: MediaType::Photo,
        }
    }

    #[tokio::test]
    async fn test_success_counts_calls() {
        let mock = MockPublisher::success(PlatformKind::Facebook);
        let id = mock.publish(&credential(), &request()).await.unwrap();
        assert_eq!(id, "mock-facebook-p1");
        assert_eq!(mock.publish_call_count(), 1);
        assert_eq!(mock.published().len(), 1);
    }

    #[tokio::test]
    async fn test_flaky_recovers() {
        let mock = MockPublisher::flaky(
            PlatformKind::Instagram,
            PlatformError::Network("reset".to_string()),
            2,
        );
        assert!(mock.publish(&credential(), &request()).await.is_err());
        assert!(mock.publish(&credential(), &request()).await.is_err());
        assert!(mock.publish(&credential(), &request()).await.is_ok());
        assert_eq!(mock.publish_call_count(), 3);
    }

    #[tokio::test]
    async fn test_stuck_processing() {
        let mock = MockPublisher::stuck_processing(PlatformKind::Instagram);
        let result = mock.publish(&credential(), &request()).await;
        assert!(matches!(
            result,
            Err(ReelcastError::Platform(PlatformError::ProcessingTimeout(_)))
        ));
        assert!(mock.published().is_empty());
    }

    #[tokio::test]
    async fn test_rejecting_credentials() {
        let mock = MockPublisher::rejecting_credentials(PlatformKind::Instagram);
        assert!(mock.check_credential(&credential()).await.is_err());
        assert_eq!(mock.credential_check_count(), 1);
    }
}
