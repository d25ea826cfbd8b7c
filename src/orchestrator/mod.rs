//! Per-post pipeline: resolve, scrape concurrently, merge, hand media to the
//! downloader.
//!
//! Posts run one after another; the sources of one post and the media items
//! of one post run concurrently, and the orchestrator always waits for all of
//! them to settle.

mod download;
mod merge;

pub use download::{
    IssueKind, ListingDownloader, MediaDownloader, RetrievalIssue, RetrievalResult,
    RetrievalStatus,
};
pub use merge::{MergeOutcome, merge_bundles};

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{RetrievalConfig, ServiceEndpoints, SourceKind};
use crate::error::RetrievalError;
use crate::fetch::FetchClient;
use crate::reference::{self, PostReference};
use crate::source::{
    BrowserDriver, BrowserSource, DirectSource, MediaBundle, MirrorSource, Source, UserIdLookup,
};
use crate::video::{VideoError, VideoResolver};
use merge::union_into;

/// Lifecycle of one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostState {
    /// Expanding the reference.
    Resolving,
    /// Sources are running.
    Scraping,
    /// Combining bundles.
    Merging,
    /// Media handed to the downloader.
    Done,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for PostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolving => "resolving",
            Self::Scraping => "scraping",
            Self::Merging => "merging",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Drives a batch of post references through every enabled source.
pub struct Orchestrator {
    client: Arc<FetchClient>,
    mirror: Arc<dyn Source>,
    browser: Arc<BrowserSource>,
    direct: Arc<dyn Source>,
    video: Arc<VideoResolver>,
    user_ids: Option<UserIdLookup>,
    downloader: Arc<dyn MediaDownloader>,
}

impl Orchestrator {
    /// Builds the default pipeline over `client`.
    ///
    /// The browser source has no driver until
    /// [`with_browser_driver`](Self::with_browser_driver) supplies one; media
    /// URLs are only listed until [`with_downloader`](Self::with_downloader)
    /// supplies a downloader.
    #[must_use]
    pub fn new(client: Arc<FetchClient>, endpoints: &ServiceEndpoints) -> Self {
        let video = Arc::new(VideoResolver::new(client.clone(), endpoints));
        Self {
            mirror: Arc::new(MirrorSource::new(client.clone(), video.clone())),
            browser: Arc::new(BrowserSource::new(None)),
            direct: Arc::new(DirectSource::new(client.clone(), endpoints.canonical.clone())),
            user_ids: Some(UserIdLookup::new(client.clone(), endpoints)),
            video,
            downloader: Arc::new(ListingDownloader),
            client,
        }
    }

    /// Attaches the headless-browser collaborator.
    #[must_use]
    pub fn with_browser_driver(mut self, driver: Arc<dyn BrowserDriver>) -> Self {
        self.browser = Arc::new(BrowserSource::new(Some(driver)));
        self
    }

    /// Replaces the per-media downloader.
    #[must_use]
    pub fn with_downloader(mut self, downloader: Arc<dyn MediaDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    /// Replaces the mirror or direct source.
    ///
    /// Browser sources are attached through
    /// [`with_browser_driver`](Self::with_browser_driver) instead.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        match source.kind() {
            SourceKind::Mirror => self.mirror = source,
            SourceKind::Direct => self.direct = source,
            SourceKind::Browser => warn!("Ignoring browser source; attach a browser driver instead"),
        }
        self
    }

    /// Skips the numeric user-id lookup.
    #[must_use]
    pub fn without_user_id_lookup(mut self) -> Self {
        self.user_ids = None;
        self
    }

    fn enabled_sources(&self, config: &RetrievalConfig) -> Vec<Arc<dyn Source>> {
        let browser: Arc<dyn Source> = self.browser.clone();
        [
            (SourceKind::Mirror, self.mirror.clone()),
            (SourceKind::Browser, browser),
            (SourceKind::Direct, self.direct.clone()),
        ]
        .into_iter()
        .filter(|(kind, _)| config.uses(*kind))
        .map(|(_, source)| source)
        .collect()
    }

    /// Runs every enabled source against `post` and merges the results.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::AllSourcesFailed`] when the merged bundle has
    /// no media, and [`RetrievalError::NoSourcesEnabled`] for an empty source set.
    #[instrument(level = "debug", skip_all, fields(post = %post))]
    pub async fn resolve_bundle(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<MediaBundle, RetrievalError> {
        let sources = self.enabled_sources(config);
        if sources.is_empty() {
            return Err(RetrievalError::NoSourcesEnabled);
        }
        debug!(state = %PostState::Scraping, sources = sources.len(), "Scraping post");

        let scrapes = join_all(sources.iter().map(|source| async move {
            let kind = source.kind();
            let bundle = source
                .fetch_bundle(post, config)
                .await
                .unwrap_or_else(|error| {
                    debug!(source = %kind, error = %error, "Source failed");
                    MediaBundle::failed(error)
                });
            (kind, bundle)
        }));
        let user_id = async {
            match &self.user_ids {
                Some(lookup) => lookup.lookup(post.username()).await,
                None => None,
            }
        };
        let (bundles, user_id) = tokio::join!(scrapes, user_id);

        debug!(state = %PostState::Merging, "Merging bundles");
        let MergeOutcome {
            bundle: mut merged,
            failures,
        } = merge_bundles(bundles);
        if merged.user_id.is_none() {
            merged.user_id = user_id;
        }

        let produced = failures.len() < sources.len();
        if produced && merged.is_video && !merged.has_video_url() {
            match self.video.resolve_video(post, config).await {
                Ok(Some(url)) => merged.media.push(url),
                Ok(None) => debug!("No video URL found"),
                Err(VideoError::Manifest(error)) => debug!(error = %error, "Treating unusable manifest as no video"),
                Err(error) => warn!(error = %error, "Video lookup failed"),
            }
        }

        if config.avatar
            && let Some(avatar) = merged.avatar.clone()
        {
            union_into(&mut merged.media, [avatar]);
        }
        if config.quote {
            let quoted = merged.quote_media.clone();
            union_into(&mut merged.media, quoted);
        }

        if merged.media.is_empty() {
            return Err(RetrievalError::AllSourcesFailed {
                post_url: post.final_url().to_string(),
                failures,
            });
        }
        for (kind, error) in &failures {
            debug!(source = %kind, error = %error, "Source failed; using the others");
        }
        Ok(merged)
    }

    /// Resolves, scrapes and downloads one post.
    ///
    /// Media items are handed to the downloader concurrently; their results
    /// come back in media order.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError`] when the reference cannot be resolved or no
    /// source produced media.
    pub async fn retrieve_post(
        &self,
        input: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        debug!(state = %PostState::Resolving, input, "Resolving reference");
        let post = reference::resolve(&self.client, input, config).await?;
        let bundle = self.resolve_bundle(&post, config).await?;

        let count = bundle.media.len();
        info!(post = %post, "Found {count} item(s) in post");
        let results = join_all(
            bundle
                .media
                .iter()
                .map(|media_url| self.downloader.download(media_url, &post, &bundle)),
        )
        .await;
        debug!(state = %PostState::Done, "Post download has finished");
        Ok(results)
    }

    /// Processes `inputs` in order and returns one result list per input.
    ///
    /// With `ignore_errors` a failed post is logged and contributes an empty
    /// list; otherwise the first failure ends the batch. The browser is
    /// closed afterwards either way.
    ///
    /// # Errors
    ///
    /// Returns the first [`RetrievalError`] unless `config.ignore_errors` is set.
    pub async fn run_batch(
        &self,
        inputs: &[String],
        config: &RetrievalConfig,
    ) -> Result<Vec<Vec<RetrievalResult>>, RetrievalError> {
        let total = inputs.len();
        let mut results = Vec::with_capacity(total);
        let mut outcome = Ok(());

        for (index, input) in inputs.iter().enumerate() {
            info!(url = %input, "({} / {total}) Parsing URL", index + 1);
            match self.retrieve_post(input, config).await {
                Ok(post_results) => results.push(post_results),
                Err(failure) => {
                    let reason = failure.classification();
                    if config.ignore_errors {
                        warn!(
                            state = %PostState::Failed,
                            url = %input,
                            reason = %reason,
                            error = %failure,
                            "Skipping failed post"
                        );
                        results.push(Vec::new());
                    } else {
                        error!(
                            state = %PostState::Failed,
                            url = %input,
                            reason = %reason,
                            error = %failure,
                            "Post failed"
                        );
                        outcome = Err(failure);
                        break;
                    }
                }
            }
        }

        self.close().await;
        outcome.map(|()| results)
    }

    /// Releases the browser, if one was attached.
    pub async fn close(&self) {
        self.browser.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use url::Url;

    use super::*;
    use crate::mirror::MirrorRegistry;
    use crate::source::SourceError;

    struct FixedSource {
        kind: SourceKind,
        result: Result<MediaBundle, SourceError>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn new(kind: SourceKind, result: Result<MediaBundle, SourceError>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Source for FixedSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn fetch_bundle(
            &self,
            _post: &PostReference,
            _config: &RetrievalConfig,
        ) -> Result<MediaBundle, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn images(urls: &[&str]) -> MediaBundle {
        MediaBundle {
            avatar: Some("https://pbs.twimg.com/profile_images/1/me.jpg".to_string()),
            media: urls.iter().map(ToString::to_string).collect(),
            quote_media: vec!["https://pbs.twimg.com/media/quoted.jpg".to_string()],
            ..MediaBundle::default()
        }
    }

    fn orchestrator(mirror: Arc<FixedSource>, direct: Arc<FixedSource>) -> Orchestrator {
        let mirrors = Arc::new(MirrorRegistry::with_defaults().unwrap());
        let client = Arc::new(FetchClient::new(mirrors).unwrap());
        Orchestrator::new(client, &ServiceEndpoints::default())
            .without_user_id_lookup()
            .with_source(mirror)
            .with_source(direct)
    }

    fn post() -> PostReference {
        let url = Url::parse("https://twitter.com/a/status/1").unwrap();
        PostReference::from_final_url("https://twitter.com/a/status/1", url).unwrap()
    }

    fn config(sources: &[SourceKind]) -> RetrievalConfig {
        RetrievalConfig {
            sources: sources.iter().copied().collect::<BTreeSet<_>>(),
            ..RetrievalConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_sources_are_not_called() {
        let mirror = FixedSource::new(SourceKind::Mirror, Ok(images(&["m.jpg"])));
        let direct = FixedSource::new(SourceKind::Direct, Ok(images(&["d.jpg"])));
        let orchestrator = orchestrator(mirror.clone(), direct.clone());

        let bundle = orchestrator
            .resolve_bundle(&post(), &config(&[SourceKind::Mirror]))
            .await
            .unwrap();
        assert_eq!(bundle.media, vec!["m.jpg"]);
        assert_eq!(mirror.calls.load(Ordering::SeqCst), 1);
        assert_eq!(direct.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_failing_source_does_not_abort_others() {
        let mirror = FixedSource::new(SourceKind::Mirror, Err(SourceError::not_found("gone")));
        let direct = FixedSource::new(SourceKind::Direct, Ok(images(&["d.jpg"])));
        let orchestrator = orchestrator(mirror, direct);

        let bundle = orchestrator
            .resolve_bundle(&post(), &config(&[SourceKind::Mirror, SourceKind::Direct]))
            .await
            .unwrap();
        assert_eq!(bundle.media, vec!["d.jpg"]);
    }

    #[tokio::test]
    async fn test_all_sources_failed() {
        let mirror = FixedSource::new(SourceKind::Mirror, Err(SourceError::not_found("gone")));
        let direct = FixedSource::new(SourceKind::Direct, Ok(MediaBundle::default()));
        let orchestrator = orchestrator(mirror, direct);

        let error = orchestrator
            .resolve_bundle(&post(), &config(&[SourceKind::Mirror, SourceKind::Direct]))
            .await
            .unwrap_err();
        match error {
            RetrievalError::AllSourcesFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, SourceKind::Mirror);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_avatar_and_quote_appended_when_requested() {
        let mirror = FixedSource::new(SourceKind::Mirror, Ok(images(&["m.jpg"])));
        let direct = FixedSource::new(SourceKind::Direct, Ok(MediaBundle::default()));
        let orchestrator = orchestrator(mirror, direct);
        let config = RetrievalConfig {
            avatar: true,
            quote: true,
            ..config(&[SourceKind::Mirror])
        };

        let bundle = orchestrator.resolve_bundle(&post(), &config).await.unwrap();
        assert_eq!(
            bundle.media,
            vec![
                "m.jpg",
                "https://pbs.twimg.com/profile_images/1/me.jpg",
                "https://pbs.twimg.com/media/quoted.jpg",
            ]
        );
    }

    #[tokio::test]
    async fn test_quote_and_avatar_media_alone_count_as_media() {
        let mirror = FixedSource::new(SourceKind::Mirror, Ok(images(&[])));
        let direct = FixedSource::new(SourceKind::Direct, Ok(MediaBundle::default()));
        let orchestrator = orchestrator(mirror, direct);
        let config = RetrievalConfig {
            avatar: true,
            quote: true,
            ..config(&[SourceKind::Mirror])
        };

        let bundle = orchestrator.resolve_bundle(&post(), &config).await.unwrap();
        assert_eq!(
            bundle.media,
            vec![
                "https://pbs.twimg.com/profile_images/1/me.jpg",
                "https://pbs.twimg.com/media/quoted.jpg",
            ]
        );

        let quote_only = RetrievalConfig {
            avatar: false,
            ..config
        };
        let bundle = orchestrator.resolve_bundle(&post(), &quote_only).await.unwrap();
        assert_eq!(bundle.media, vec!["https://pbs.twimg.com/media/quoted.jpg"]);
    }

    #[tokio::test]
    async fn test_unrequested_extras_do_not_rescue_empty_post() {
        let mirror = FixedSource::new(SourceKind::Mirror, Ok(images(&[])));
        let direct = FixedSource::new(SourceKind::Direct, Ok(MediaBundle::default()));
        let orchestrator = orchestrator(mirror, direct);

        let error = orchestrator
            .resolve_bundle(&post(), &config(&[SourceKind::Mirror]))
            .await
            .unwrap_err();
        assert!(matches!(error, RetrievalError::AllSourcesFailed { ref failures, .. } if failures.is_empty()));
    }

    /// Fails on chosen URLs and reports the rest as downloaded.
    struct FlakyDownloader {
        write_fails: &'static str,
        metadata_fails: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaDownloader for FlakyDownloader {
        async fn download(
            &self,
            media_url: &str,
            post: &PostReference,
            _bundle: &MediaBundle,
        ) -> RetrievalResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if media_url == self.write_fails {
                RetrievalResult::failed(media_url, post, IssueKind::Write, "disk full")
            } else if media_url == self.metadata_fails {
                RetrievalResult::failed(media_url, post, IssueKind::Metadata, "bad exif")
            } else {
                RetrievalResult::new(RetrievalStatus::Downloaded, media_url, post)
            }
        }
    }

    #[tokio::test]
    async fn test_failed_media_item_does_not_abort_siblings() {
        let mirror = FixedSource::new(
            SourceKind::Mirror,
            Ok(images(&["one.jpg", "two.jpg", "three.jpg", "four.jpg"])),
        );
        let direct = FixedSource::new(SourceKind::Direct, Ok(MediaBundle::default()));
        let downloader = Arc::new(FlakyDownloader {
            write_fails: "two.jpg",
            metadata_fails: "three.jpg",
            calls: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator(mirror, direct).with_downloader(downloader.clone());

        let results = orchestrator
            .retrieve_post("https://twitter.com/a/status/1", &config(&[SourceKind::Mirror]))
            .await
            .unwrap();

        assert_eq!(downloader.calls.load(Ordering::SeqCst), 4);
        let statuses: Vec<RetrievalStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                RetrievalStatus::Downloaded,
                RetrievalStatus::Failed,
                RetrievalStatus::Failed,
                RetrievalStatus::Downloaded,
            ]
        );
        assert_eq!(results[1].errors[0].kind, IssueKind::Write);
        assert_eq!(results[2].errors[0].kind, IssueKind::Metadata);
        assert_eq!(results[2].errors[0].kind.to_string(), "metadata");
        assert!(results[3].errors.is_empty());
        assert_eq!(results[3].media_url, "four.jpg");
    }

    #[tokio::test]
    async fn test_no_sources_enabled() {
        let mirror = FixedSource::new(SourceKind::Mirror, Ok(images(&["m.jpg"])));
        let direct = FixedSource::new(SourceKind::Direct, Ok(images(&["d.jpg"])));
        let orchestrator = orchestrator(mirror, direct);
        let result = orchestrator.resolve_bundle(&post(), &config(&[])).await;
        assert!(matches!(result, Err(RetrievalError::NoSourcesEnabled)));
    }

    #[tokio::test]
    async fn test_batch_ignore_errors_keeps_input_order() {
        let mirror = FixedSource::new(SourceKind::Mirror, Ok(images(&["m.jpg"])));
        let direct = FixedSource::new(SourceKind::Direct, Ok(MediaBundle::default()));
        let orchestrator = orchestrator(mirror, direct);
        let config = RetrievalConfig {
            ignore_errors: true,
            ..config(&[SourceKind::Mirror])
        };
        let inputs = vec![
            "https://twitter.com/a/status/1".to_string(),
            "https://twitter.com/home".to_string(),
            "https://x.com/b/status/2".to_string(),
        ];

        let results = orchestrator.run_batch(&inputs, &config).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].status, RetrievalStatus::Listed);
        assert!(results[1].is_empty());
        assert_eq!(results[2][0].post_url, "https://twitter.com/b/status/2");
    }

    #[tokio::test]
    async fn test_batch_stops_on_first_failure() {
        let mirror = FixedSource::new(SourceKind::Mirror, Ok(images(&["m.jpg"])));
        let direct = FixedSource::new(SourceKind::Direct, Ok(MediaBundle::default()));
        let orchestrator = orchestrator(mirror.clone(), direct);
        let inputs = vec![
            "https://twitter.com/home".to_string(),
            "https://twitter.com/a/status/1".to_string(),
        ];

        let result = orchestrator
            .run_batch(&inputs, &config(&[SourceKind::Mirror]))
            .await;
        assert!(matches!(result, Err(RetrievalError::Reference(_))));
        assert_eq!(mirror.calls.load(Ordering::SeqCst), 0);
    }
}
