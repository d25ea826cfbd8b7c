//! Direct source: scrapes the canonical site's legacy (no-script) markup.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use super::{MediaBundle, Source, SourceError, attr_of, first, first_in, selector, text_of};
use crate::cache::Service;
use crate::config::{RetrievalConfig, SourceKind};
use crate::fetch::{FetchClient, FetchRequest};
use crate::reference::{PostReference, parse_post_path};
use crate::user_agent::LEGACY_MARKUP_USER_AGENT;

/// How many nested quoted posts are followed.
pub const MAX_QUOTE_DEPTH: usize = 3;

const SHORT_PICTURE_HOST: &str = "pic.twitter.com";

/// What one legacy post page yields.
struct LegacyPage {
    bundle: MediaBundle,
    quoted_path: Option<String>,
}

/// Scrapes the canonical site directly.
pub struct DirectSource {
    client: Arc<FetchClient>,
    canonical: String,
}

impl DirectSource {
    /// Creates the source against the canonical site base (e.g. `https://twitter.com`).
    #[must_use]
    pub fn new(client: Arc<FetchClient>, canonical: impl Into<String>) -> Self {
        Self {
            client,
            canonical: canonical.into().trim_end_matches('/').to_string(),
        }
    }

    fn scrape<'a>(
        &'a self,
        status_path: String,
        config: &'a RetrievalConfig,
        depth: usize,
    ) -> BoxFuture<'a, Result<MediaBundle, SourceError>> {
        async move {
            let url = Url::parse(&format!("{}{status_path}", self.canonical))
                .map_err(|e| SourceError::parse(format!("post URL: {e}")))?;
            let page = self
                .client
                .fetch(
                    FetchRequest::get(url)
                        .service(Service::Canonical)
                        .user_agent(LEGACY_MARKUP_USER_AGENT)
                        .header("Accept-Language", "en-US,en;q=0.5")
                        .cookie(config.cookie()),
                )
                .await?;
            if !page.is_success() {
                return Err(SourceError::Transport {
                    status: Some(page.status),
                    message: format!("canonical site returned {}", page.status),
                });
            }

            let LegacyPage {
                mut bundle,
                quoted_path,
            } = parse_legacy_page(&page.body)?;

            if config.quote
                && depth < MAX_QUOTE_DEPTH
                && let Some(quoted_path) = quoted_path
            {
                match self.scrape(quoted_path, config, depth + 1).await {
                    Ok(quoted) => {
                        bundle.quote_media.extend(quoted.media);
                        bundle.quote_media.extend(quoted.quote_media);
                    }
                    Err(error) => debug!(error = %error, "Quoted post unavailable"),
                }
            }
            Ok(bundle)
        }
        .boxed()
    }
}

#[async_trait]
impl Source for DirectSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    #[instrument(level = "debug", skip_all, fields(post = %post))]
    async fn fetch_bundle(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<MediaBundle, SourceError> {
        self.scrape(post.status_path(), config, 0).await
    }
}

fn parse_legacy_page(body: &str) -> Result<LegacyPage, SourceError> {
    let doc = Html::parse_document(body);
    let Some(container) = first_in(&doc, ".permalink-tweet-container")? else {
        return Err(SourceError::not_found("Tweet is not found."));
    };
    let Some(tweet) = first(container, ".permalink-tweet")? else {
        return Err(SourceError::not_found("Tweet is not found."));
    };
    let sidebar = first_in(&doc, ".ProfileSidebar")?;
    let side = |css: &str| -> Result<Option<String>, SourceError> {
        Ok(match sidebar {
            Some(sidebar) => text_of(first(sidebar, css)?),
            None => None,
        })
    };

    let is_video = first(tweet, ".AdaptiveMedia.is-video")?.is_some();
    let media = if is_video {
        Vec::new()
    } else {
        container
            .select(&selector(".AdaptiveMediaOuterContainer .js-adaptive-photo")?)
            .filter_map(|photo| attr_of(Some(photo), "data-image-url"))
            .collect()
    };

    let quoted_path = attr_of(first(tweet, ".twitter-timeline-link")?, "data-expanded-url")
        .and_then(|expanded| Url::parse(&expanded).ok())
        .and_then(|expanded| parse_post_path(&expanded))
        .map(|(username, id)| format!("/{username}/status/{id}"));

    let value = tweet.value();
    let bundle = MediaBundle {
        name: value.attr("data-name").map(ToString::to_string),
        username: value.attr("data-screen-name").map(ToString::to_string),
        user_id: value.attr("data-user-id").map(ToString::to_string),
        avatar: attr_of(first(tweet, ".js-action-profile-avatar")?, "src")
            .map(|src| src.replace("_bigger", "")),
        bio: side(".ProfileHeaderCard-bio")?,
        website: side(".ProfileHeaderCard-url")?,
        location: side(".ProfileHeaderCard-location")?,
        joined: side(".ProfileHeaderCard-joinDate")?,
        birthday: side(".ProfileHeaderCard-birthdate")?,
        text: text_of(first(tweet, ".js-tweet-text-container")?)
            .map(|text| text.replace(SHORT_PICTURE_HOST, &format!(" {SHORT_PICTURE_HOST}"))),
        timestamp: attr_of(first(tweet, ".tweet-timestamp ._timestamp")?, "data-time-ms")
            .and_then(|ms| ms.parse().ok()),
        is_video,
        media,
        ..MediaBundle::default()
    };
    Ok(LegacyPage {
        bundle,
        quoted_path,
    })
}
