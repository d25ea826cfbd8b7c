//! Best-quality video URL discovery.
//!
//! Three paths lead to a playable URL:
//!
//! - the mirror's own player, after enabling HLS playback (used by the mirror
//!   source while it scrapes a video post),
//! - a primary lookup service that answers a form POST with a download link,
//! - a token-protected secondary lookup service whose result page lists one
//!   link per resolution; the largest `width x height` wins.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::Html;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use super::manifest::{ManifestError, decode_obfuscated_locator, resolve_locator, select_variant};
use crate::cache::Service;
use crate::config::{RetrievalConfig, ServiceEndpoints};
use crate::fetch::{FetchClient, FetchError, FetchRequest};
use crate::mirror::MirrorEndpoint;
use crate::reference::PostReference;
use crate::source::{SourceError, attr_of, first_in, selector};
use crate::util::{absolutize_url, compile_static_regex};

/// Banner text the primary service shows when it has no video.
const PRIMARY_NOT_FOUND_BANNER: &str = "Uh-Oh!";

/// Cookie that makes the mirror render `<video data-url>` players.
const HLS_PLAYBACK_COOKIE: &str = "hlsPlayback=on";

/// Form fields the secondary service may use for its CSRF-style token.
const TOKEN_FIELDS: &[&str] = &["_token", "tt", "token", "csrf_token"];

static DIMENSIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"/([0-9]{2,5})x([0-9]{2,5})/"));
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"([0-9]{3,4})p"));

/// Errors raised while looking up a video URL.
#[derive(Debug, Error)]
pub enum VideoError {
    /// A lookup or manifest request failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A manifest was fetched but had no usable variant.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A page could not be parsed.
    #[error(transparent)]
    Page(#[from] SourceError),
}

/// What the mirror's player page offers.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlayerSource {
    /// A direct `<source src>` file.
    File(String),
    /// A multi-variant manifest path.
    Manifest(String),
}

/// What the primary lookup service answered.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PrimaryAnswer {
    Link(String),
    NotFound,
}

/// Resolves playable video URLs for posts known to contain video.
#[derive(Debug, Clone)]
pub struct VideoResolver {
    client: Arc<FetchClient>,
    primary: String,
    secondary: String,
}

impl VideoResolver {
    /// Creates a resolver using the lookup services in `endpoints`.
    #[must_use]
    pub fn new(client: Arc<FetchClient>, endpoints: &ServiceEndpoints) -> Self {
        Self {
            client,
            primary: endpoints.video_lookup.clone(),
            secondary: endpoints.video_lookup_alt.clone(),
        }
    }

    /// Returns the best playable URL for `post`, or `None` when neither
    /// lookup service knows one.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError`] when a lookup request fails outright.
    #[instrument(level = "debug", skip(self, post, config), fields(post = %post))]
    pub async fn resolve_video(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<Option<String>, VideoError> {
        match self.lookup_primary(post, config).await {
            Ok(PrimaryAnswer::Link(link)) => return Ok(Some(link)),
            Ok(PrimaryAnswer::NotFound) => {
                debug!("Primary video lookup has no result; trying secondary");
            }
            Err(error) => {
                debug!(error = %error, "Primary video lookup failed; trying secondary");
            }
        }
        self.lookup_secondary(post, config).await
    }

    /// Asks the mirror's HLS player for the stream of `post`.
    ///
    /// A direct `<source>` file is returned as-is; a manifest is fetched and
    /// its highest-resolution variant resolved.
    ///
    /// # Errors
    ///
    /// Returns [`VideoError`] when the player or manifest request fails or the
    /// manifest has no usable variant.
    #[instrument(level = "debug", skip(self, mirror, post, config), fields(mirror = mirror.as_str(), post = %post))]
    pub async fn resolve_mirror_stream(
        &self,
        mirror: &MirrorEndpoint,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<Option<String>, VideoError> {
        let mirror_url = |path: &str| {
            mirror
                .join(path)
                .map_err(|e| SourceError::parse(format!("mirror URL: {e}")))
        };
        let url = mirror_url("/enablehls")?;
        let cookie = with_hls_playback(config.cookie());
        let page = self
            .client
            .fetch(
                FetchRequest::post_form(url, [("referer", post.status_path())])
                    .service(Service::Mirror)
                    .cookie(Some(cookie.as_str()))
                    .uncached(),
            )
            .await?;

        let Some(player) = parse_player(&page.body)? else {
            debug!("Mirror page has no video player");
            return Ok(None);
        };
        match player {
            PlayerSource::File(src) => Ok(absolutize_url(&src, &page.url)),
            PlayerSource::Manifest(path) => {
                let manifest_url = resolve_locator(&path, &page.url)?;
                let manifest_url = Url::parse(&manifest_url).map_err(|_| {
                    ManifestError::InvalidLocator {
                        locator: manifest_url.clone(),
                    }
                })?;
                let manifest = self
                    .client
                    .fetch(FetchRequest::get(manifest_url).uncached())
                    .await?;
                let variant = select_variant(&manifest.body)?;
                debug!(width = variant.width, height = variant.height, "Selected stream variant");
                // Variant paths are served by the mirror, wherever the manifest lives.
                Ok(Some(resolve_locator(&variant.uri, &mirror_url("/")?)?))
            }
        }
    }

    async fn lookup_primary(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<PrimaryAnswer, VideoError> {
        let url = parse_endpoint(&self.primary)?;
        let response = self
            .client
            .fetch(
                FetchRequest::post_form(url, [("url", post.final_url().as_str())])
                    .service(Service::VideoLookup)
                    .cookie(config.cookie()),
            )
            .await?;
        Ok(parse_primary(&response.body, &response.url)?)
    }

    async fn lookup_secondary(
        &self,
        post: &PostReference,
        config: &RetrievalConfig,
    ) -> Result<Option<String>, VideoError> {
        let url = parse_endpoint(&self.secondary)?;
        let landing = self
            .client
            .fetch(
                FetchRequest::get(url)
                    .service(Service::VideoLookupAlt)
                    .uncached(),
            )
            .await?;
        let Some(form) = parse_token_form(&landing.body, &landing.url)? else {
            debug!("Secondary video lookup offered no token");
            return Ok(None);
        };

        let response = self
            .client
            .fetch(
                FetchRequest::post_form(
                    form.action,
                    [
                        ("id".to_string(), post.final_url().to_string()),
                        (form.field, form.token),
                    ],
                )
                .service(Service::VideoLookupAlt)
                .cookie(config.cookie())
                .header("Referer", landing.url.as_str()),
            )
            .await?;
        let link = best_resolution_link(&response.body, &response.url)?;
        if let Some(link) = &link {
            info!(url = %link, "Found video via secondary lookup");
        }
        Ok(link)
    }
}

fn parse_endpoint(value: &str) -> Result<Url, VideoError> {
    Url::parse(value)
        .map_err(|e| VideoError::Page(SourceError::parse(format!("lookup endpoint '{value}': {e}"))))
}

fn parse_player(body: &str) -> Result<Option<PlayerSource>, SourceError> {
    let doc = Html::parse_document(body);
    let Some(video) = first_in(
        &doc,
        ".main-tweet .attachments .attachment.video-container video, .main-tweet .attachments.media-gif video",
    )?
    else {
        return Ok(None);
    };
    let source = video.select(&selector("source")?).next();
    if let Some(src) = attr_of(source, "src") {
        return Ok(Some(PlayerSource::File(src)));
    }
    Ok(attr_of(Some(video), "data-url").map(PlayerSource::Manifest))
}

fn parse_primary(body: &str, base: &Url) -> Result<PrimaryAnswer, SourceError> {
    let doc = Html::parse_document(body);
    let banner = doc
        .select(&selector(".alert-danger")?)
        .any(|el| el.text().collect::<String>().contains(PRIMARY_NOT_FOUND_BANNER));
    if banner {
        return Ok(PrimaryAnswer::NotFound);
    }
    if let Some(href) = attr_of(first_in(&doc, ".dropbox-saver")?, "href")
        && let Some(link) = absolutize_url(&href, base)
    {
        return Ok(PrimaryAnswer::Link(link));
    }

    let mut best: Option<(u64, String)> = None;
    for anchor in doc.select(&selector("a[download][href]")?) {
        let Some(href) = attr_of(Some(anchor), "href") else {
            continue;
        };
        let label = anchor.text().collect::<String>();
        let score = area_in_path(&href).or_else(|| label_height(&label)).unwrap_or(0);
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, href));
        }
    }
    Ok(best
        .and_then(|(_, href)| absolutize_url(&href, base))
        .map_or(PrimaryAnswer::NotFound, PrimaryAnswer::Link))
}

struct TokenForm {
    action: Url,
    field: String,
    token: String,
}

fn parse_token_form(body: &str, page: &Url) -> Result<Option<TokenForm>, SourceError> {
    let doc = Html::parse_document(body);
    let action = attr_of(first_in(&doc, "form[action]")?, "action")
        .and_then(|action| page.join(&action).ok())
        .unwrap_or_else(|| page.clone());

    for field in TOKEN_FIELDS {
        let css = format!("input[name=\"{field}\"]");
        if let Some(token) = attr_of(first_in(&doc, &css)?, "value") {
            return Ok(Some(TokenForm {
                action,
                field: (*field).to_string(),
                token,
            }));
        }
    }
    let meta = attr_of(first_in(&doc, "meta[name=\"csrf-token\"]")?, "content");
    Ok(meta.map(|token| TokenForm {
        action,
        field: "_token".to_string(),
        token,
    }))
}

/// Adds the HLS playback switch to the caller's cookie header.
fn with_hls_playback(cookie: Option<&str>) -> String {
    match cookie.map(|c| c.trim().trim_end_matches(';')) {
        Some(existing) if !existing.is_empty() => format!("{existing}; {HLS_PLAYBACK_COOKIE}"),
        _ => HLS_PLAYBACK_COOKIE.to_string(),
    }
}

/// Picks the link whose path embeds the largest `WxH`; ties keep the first.
fn best_resolution_link(body: &str, base: &Url) -> Result<Option<String>, SourceError> {
    let doc = Html::parse_document(body);
    let mut best: Option<(u64, String)> = None;

    for anchor in doc.select(&selector("a[href]")?) {
        let Some(raw) = attr_of(Some(anchor), "href") else {
            continue;
        };
        let href = if raw.contains("/enc/") {
            decode_obfuscated_locator(&raw).unwrap_or(raw)
        } else {
            urlencoding::decode(&raw).map_or(raw.clone(), |decoded| decoded.into_owned())
        };
        let Some(area) = area_in_path(&href) else {
            continue;
        };
        if best.as_ref().is_none_or(|(top, _)| area > *top) {
            best = Some((area, href));
        }
    }
    Ok(best.and_then(|(_, href)| absolutize_url(&href, base)))
}

fn area_in_path(href: &str) -> Option<u64> {
    let caps = DIMENSIONS_RE.captures(href)?;
    let width: u64 = caps[1].parse().ok()?;
    let height: u64 = caps[2].parse().ok()?;
    Some(width * height)
}

fn label_height(label: &str) -> Option<u64> {
    LABEL_RE.captures(label)?[1].parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://lookup.example/").unwrap()
    }

    #[test]
    fn test_hls_playback_cookie_keeps_caller_cookie() {
        assert_eq!(with_hls_playback(None), "hlsPlayback=on");
        assert_eq!(with_hls_playback(Some("  ")), "hlsPlayback=on");
        assert_eq!(
            with_hls_playback(Some("auth_token=abc; ct0=def;")),
            "auth_token=abc; ct0=def; hlsPlayback=on"
        );
    }

    #[test]
    fn test_primary_banner_means_not_found() {
        let body = r#"<div class="alert alert-danger">Uh-Oh! This tweet has no video.</div>"#;
        assert_eq!(parse_primary(body, &base()).unwrap(), PrimaryAnswer::NotFound);
    }

    #[test]
    fn test_primary_dropbox_link() {
        let body = r#"<a class="dropbox-saver" href="https://video.twimg.com/v/720.mp4">Save</a>"#;
        assert_eq!(
            parse_primary(body, &base()).unwrap(),
            PrimaryAnswer::Link("https://video.twimg.com/v/720.mp4".to_string())
        );
    }

    #[test]
    fn test_primary_download_rows_pick_highest_label() {
        let body = r#"<table>
            <tr><td>320p</td><td><a download href="https://v.example/320.mp4">320p</a></td></tr>
            <tr><td>720p</td><td><a download href="https://v.example/720.mp4">720p</a></td></tr>
            <tr><td>480p</td><td><a download href="https://v.example/480.mp4">480p</a></td></tr>
        </table>"#;
        assert_eq!(
            parse_primary(body, &base()).unwrap(),
            PrimaryAnswer::Link("https://v.example/720.mp4".to_string())
        );
    }

    #[test]
    fn test_best_resolution_link_by_area() {
        let body = r#"
            <a href="https://video.twimg.com/ext_tw_video/1/pu/vid/480x270/a.mp4">480p</a>
            <a href="https://video.twimg.com/ext_tw_video/1/pu/vid/1280x720/b.mp4">720p</a>
            <a href="https://video.twimg.com/ext_tw_video/1/pu/vid/640x360/c.mp4">360p</a>
            <a href="/about">About</a>"#;
        assert_eq!(
            best_resolution_link(body, &base()).unwrap().as_deref(),
            Some("https://video.twimg.com/ext_tw_video/1/pu/vid/1280x720/b.mp4")
        );
    }

    #[test]
    fn test_best_resolution_link_decodes_enc_segments() {
        // "https://video.twimg.com/ext_tw_video/1/pu/pl/1280x720/a.m3u8" + "container=fmp4"
        let body = r#"<a href="/dl/enc/TOK/aHR0cHM6Ly92aWRlby50d2ltZy5jb20vZXh0X3R3X3ZpZGVvLzEvcHUvcGwvMTI4MHg3MjAvYS5tM3U4_Y29udGFpbmVyPWZtcDQ">HD</a>"#;
        assert_eq!(
            best_resolution_link(body, &base()).unwrap().as_deref(),
            Some("https://video.twimg.com/ext_tw_video/1/pu/pl/1280x720/a.m3u8?container=fmp4")
        );
    }

    #[test]
    fn test_token_form_from_hidden_input() {
        let body = r#"<form action="/result" method="post"><input type="hidden" name="tt" value="abc123"></form>"#;
        let form = parse_token_form(body, &base()).unwrap().unwrap();
        assert_eq!(form.action.as_str(), "https://lookup.example/result");
        assert_eq!(form.field, "tt");
        assert_eq!(form.token, "abc123");
    }

    #[test]
    fn test_token_form_from_meta() {
        let body = r#"<head><meta name="csrf-token" content="zzz"></head>"#;
        let form = parse_token_form(body, &base()).unwrap().unwrap();
        assert_eq!(form.action, base());
        assert_eq!(form.field, "_token");
        assert_eq!(form.token, "zzz");
    }

    #[test]
    fn test_player_prefers_source_file() {
        let body = r#"<div class="main-tweet"><div class="attachments"><div class="attachment video-container">
            <video data-url="/video/x/playlist.m3u8"><source src="https://video.twimg.com/tweet_video/a.mp4"></video>
        </div></div></div>"#;
        assert_eq!(
            parse_player(body).unwrap(),
            Some(PlayerSource::File("https://video.twimg.com/tweet_video/a.mp4".to_string()))
        );
    }

    #[test]
    fn test_player_manifest_data_url() {
        let body = r#"<div class="main-tweet"><div class="attachments"><div class="attachment video-container">
            <video data-url="/video/x/playlist.m3u8"></video>
        </div></div></div>"#;
        assert_eq!(
            parse_player(body).unwrap(),
            Some(PlayerSource::Manifest("/video/x/playlist.m3u8".to_string()))
        );
    }
}
