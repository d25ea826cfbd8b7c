//! Fallback source backed by an injected headless-browser driver.
//!
//! DOM automation lives outside this crate. The source only owns the driver
//! handle: it is created by the embedding program, shared for the whole batch
//! and closed exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{MediaBundle, Source, SourceError};
use crate::config::{RetrievalConfig, SourceKind};
use crate::reference::PostReference;

/// A headless-browser scraper satisfying the bundle contract.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Loads the post and extracts its media.
    async fn get_media(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<MediaBundle, SourceError>;

    /// Releases the browser.
    async fn close(&self);
}

/// Browser-backed source.
///
/// Without a driver every request fails with [`SourceError::Unavailable`].
pub struct BrowserSource {
    driver: Option<Arc<dyn BrowserDriver>>,
    closed: AtomicBool,
}

impl BrowserSource {
    /// Creates a source around `driver`.
    #[must_use]
    pub fn new(driver: Option<Arc<dyn BrowserDriver>>) -> Self {
        Self {
            driver,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true when a driver is attached.
    #[must_use]
    pub fn has_driver(&self) -> bool {
        self.driver.is_some()
    }

    /// Closes the driver; later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(driver) = &self.driver {
            debug!("Closing browser");
            driver.close().await;
        }
    }
}

#[async_trait]
impl Source for BrowserSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Browser
    }

    async fn fetch_bundle(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<MediaBundle, SourceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SourceError::unavailable("browser already closed"));
        }
        let Some(driver) = &self.driver else {
            return Err(SourceError::unavailable("no browser driver configured"));
        };
        driver.get_media(post, config).await
    }
}
