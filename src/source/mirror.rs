//! Primary source: scrapes the post page of an alternate-frontend mirror.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info, instrument, warn};

use super::{MediaBundle, Source, SourceError, attr_of, first, first_in, selector, text_of};
use crate::cache::Service;
use crate::config::{NOT_FOUND_MARKER, RetrievalConfig, SourceKind};
use crate::fetch::{FetchClient, FetchRequest};
use crate::mirror::MirrorEndpoint;
use crate::reference::PostReference;
use crate::util::{compile_static_regex, origin_of};
use crate::video::{VideoResolver, decode_base64_text};

const IMAGE_CDN: &str = "https://pbs.twimg.com";
const MIRROR_DATE_FORMAT: &str = "%b %d, %Y %I:%M %p UTC";

static PIC_ENC_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^/pic/enc/([A-Za-z0-9+/=_-]+)"));
static FORMAT_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)&format=[a-z]+"));

/// Profile fields shown on the mirror's user page.
#[derive(Debug, Default, PartialEq, Eq)]
struct ProfileCard {
    bio: Option<String>,
    website: Option<String>,
    location: Option<String>,
    joined: Option<String>,
}

impl ProfileCard {
    fn apply(self, bundle: &mut MediaBundle) {
        bundle.bio = self.bio.or(bundle.bio.take());
        bundle.website = self.website.or(bundle.website.take());
        bundle.location = self.location.or(bundle.location.take());
        bundle.joined = self.joined.or(bundle.joined.take());
    }
}

/// Scrapes posts from a randomly chosen (or pinned) mirror.
pub struct MirrorSource {
    client: Arc<FetchClient>,
    video: Arc<VideoResolver>,
}

impl MirrorSource {
    /// Creates the source.
    #[must_use]
    pub fn new(client: Arc<FetchClient>, video: Arc<VideoResolver>) -> Self {
        Self { client, video }
    }

    fn endpoint(&self, config: &RetrievalConfig) -> Result<MirrorEndpoint, SourceError> {
        let override_endpoint = config
            .mirror_override
            .as_deref()
            .map(MirrorEndpoint::parse)
            .transpose()
            .map_err(|e| SourceError::unavailable(e.to_string()))?;
        Ok(self.client.mirrors().select(override_endpoint.as_ref()))
    }

    async fn fetch_profile(
        &self,
        mirror: &MirrorEndpoint,
        username: &str,
        config: &RetrievalConfig,
    ) -> Result<ProfileCard, SourceError> {
        let url = mirror
            .join(&format!("/{username}"))
            .map_err(|e| SourceError::parse(format!("profile URL: {e}")))?;
        let page = self
            .client
            .fetch(
                FetchRequest::get(url)
                    .service(Service::Mirror)
                    .cookie(config.cookie()),
            )
            .await?;
        if !page.is_success() {
            return Err(SourceError::Transport {
                status: Some(page.status),
                message: format!("profile page returned {}", page.status),
            });
        }
        parse_profile_page(&page.body)
    }
}

#[async_trait]
impl Source for MirrorSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mirror
    }

    #[instrument(level = "debug", skip_all, fields(post = %post))]
    async fn fetch_bundle(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<MediaBundle, SourceError> {
        let mirror = self.endpoint(config)?;
        let url = mirror
            .join(&post.status_path())
            .map_err(|e| SourceError::parse(format!("mirror URL: {e}")))?;
        info!(url = %url, "Mirror URL");

        let page = self
            .client
            .fetch(
                FetchRequest::get(url)
                    .service(Service::Mirror)
                    .cookie(config.cookie()),
            )
            .await?;
        if !page.is_success() && !page.is_not_found_page() {
            return Err(SourceError::Transport {
                status: Some(page.status),
                message: format!("mirror returned {}", page.status),
            });
        }

        let mut bundle = parse_post_page(&page.body)?;
        // Follow-up requests go to the mirror that actually answered.
        let serving = MirrorEndpoint::parse(&origin_of(&page.url)).unwrap_or(mirror);

        let username = bundle
            .username
            .clone()
            .unwrap_or_else(|| post.username().to_string());
        match self.fetch_profile(&serving, &username, config).await {
            Ok(card) => card.apply(&mut bundle),
            Err(error) => debug!(username, error = %error, "Profile bio unavailable"),
        }

        if bundle.is_video {
            match self.video.resolve_mirror_stream(&serving, post, config).await {
                Ok(Some(video)) => bundle.media.push(video),
                Ok(None) => debug!("Mirror player offered no stream"),
                Err(error) => warn!(error = %error, "Could not resolve video URL from mirror"),
            }
        }
        Ok(bundle)
    }
}

/// Parses a mirror post page into a bundle.
///
/// Returns [`SourceError::NotFound`] when the page shows an error panel or has
/// no main post.
fn parse_post_page(body: &str) -> Result<MediaBundle, SourceError> {
    let doc = Html::parse_document(body);
    if let Some(panel) = first_in(&doc, ".error-panel")? {
        let message = text_of(Some(panel)).unwrap_or_else(|| NOT_FOUND_MARKER.to_string());
        return Err(SourceError::not_found(message));
    }
    let Some(tweet) = first_in(&doc, ".main-tweet .timeline-item")? else {
        return Err(SourceError::not_found(NOT_FOUND_MARKER));
    };

    let is_video = tweet
        .select(&selector(".attachment.video-container, .attachments.media-gif")?)
        .any(|el| !inside_quote(el));

    let mut media = Vec::new();
    let mut quote_media = Vec::new();
    for img in tweet.select(&selector(".attachment.image img")?) {
        let Some(src) = attr_of(Some(img), "src") else {
            continue;
        };
        if inside_quote(img) {
            quote_media.push(fix_image_url(&src));
        } else if !is_video {
            media.push(fix_image_url(&src));
        }
    }

    Ok(MediaBundle {
        name: text_of(first(tweet, ".fullname")?),
        username: text_of(first(tweet, ".username")?).map(|u| u.trim_start_matches('@').to_string()),
        avatar: attr_of(first(tweet, ".avatar")?, "src").map(|src| fix_image_url(&src)),
        text: text_of(first(tweet, ".tweet-content")?),
        timestamp: attr_of(first(tweet, ".tweet-date a")?, "title")
            .and_then(|title| parse_mirror_date(&title)),
        is_video,
        media,
        quote_media,
        ..MediaBundle::default()
    })
}

fn parse_profile_page(body: &str) -> Result<ProfileCard, SourceError> {
    let doc = Html::parse_document(body);
    let Some(card) = first_in(&doc, ".profile-card")? else {
        return Ok(ProfileCard::default());
    };
    Ok(ProfileCard {
        bio: text_of(first(card, ".profile-bio")?),
        website: text_of(first(card, ".profile-website")?),
        location: text_of(first(card, ".profile-location")?),
        joined: text_of(first(card, ".profile-joindate")?),
    })
}

fn inside_quote(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().classes().any(|class| class == "quote"))
}

/// Parses the mirror's `Jan 5, 2021 · 3:04 PM UTC` tooltip into epoch milliseconds.
fn parse_mirror_date(title: &str) -> Option<i64> {
    let cleaned = title.replace(" · ", " ");
    NaiveDateTime::parse_from_str(cleaned.trim(), MIRROR_DATE_FORMAT)
        .ok()
        .map(|date| date.and_utc().timestamp_millis())
}

/// Rewrites a mirror image path into the origin CDN URL.
///
/// Handles percent-encoded `/pic/<path>` proxies, base64 `/pic/enc/<payload>`
/// proxies, and the thumbnail decorations mirrors add.
#[must_use]
pub fn fix_image_url(src: &str) -> String {
    let decoded = urlencoding::decode(src).map_or_else(|_| src.to_string(), Cow::into_owned);
    let mut path = match url::Url::parse(&decoded) {
        Ok(url) if !url.path().starts_with("/pic") => return decoded,
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        },
        Err(_) => decoded,
    };

    let unwrapped = PIC_ENC_RE.captures(&path).and_then(|caps| {
        let inner = decode_base64_text(&caps[1])?;
        Some(format!("/{}{}", inner.trim_start_matches('/'), &path[caps[0].len()..]))
    });
    if let Some(unwrapped) = unwrapped {
        path = unwrapped;
    }
    let path = path.strip_prefix("/pic").unwrap_or(&path);
    let path = path.replace("_bigger", "").replace("?name=small", "");
    let path = FORMAT_PARAM_RE.replace(&path, "");
    let path = path.trim_start_matches('/');

    // `/pic/pbs.twimg.com/...` and `/pic/video.twimg.com/...` carry their own host.
    match path.split_once('/') {
        Some((host, _)) if host.contains('.') => format!("https://{path}"),
        _ => format!("{IMAGE_CDN}/{path}"),
    }
}
