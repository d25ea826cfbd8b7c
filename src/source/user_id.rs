//! Numeric account id lookup through two public services.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::Html;
use tracing::debug;
use url::Url;

use crate::cache::Service;
use crate::config::ServiceEndpoints;
use crate::fetch::{FetchClient, FetchRequest};
use crate::util::compile_static_regex;

static ID_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\b([0-9]{5,25})\b"));

/// Looks up account ids, primary service first.
#[derive(Debug, Clone)]
pub struct UserIdLookup {
    client: Arc<FetchClient>,
    primary: String,
    secondary: String,
}

impl UserIdLookup {
    /// Creates a lookup over the id services in `endpoints`.
    #[must_use]
    pub fn new(client: Arc<FetchClient>, endpoints: &ServiceEndpoints) -> Self {
        Self {
            client,
            primary: endpoints.id_lookup.clone(),
            secondary: endpoints.id_lookup_alt.clone(),
        }
    }

    /// Returns the numeric id of `username`, or `None` when neither service knows it.
    pub async fn lookup(&self, username: &str) -> Option<String> {
        if let Some(id) = self.ask(&self.primary, "username", username, Service::IdLookup).await {
            return Some(id);
        }
        debug!(username, "Primary id lookup failed; trying secondary");
        self.ask(&self.secondary, "input", username, Service::IdLookupAlt)
            .await
    }

    async fn ask(&self, endpoint: &str, field: &str, username: &str, service: Service) -> Option<String> {
        let url = Url::parse(endpoint).ok()?;
        let response = self
            .client
            .fetch(FetchRequest::post_form(url, [(field, username)]).service(service))
            .await
            .map_err(|error| debug!(error = %error, "Id lookup request failed"))
            .ok()?;
        if !response.is_success() {
            return None;
        }
        extract_id(&response.body)
    }
}

/// Finds the id in a plain-text or HTML answer; the literal `error` means unknown.
fn extract_id(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("error") {
        return None;
    }
    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }
    let text = Html::parse_fragment(trimmed)
        .root_element()
        .text()
        .collect::<String>();
    ID_RE.captures(&text).map(|caps| caps[1].to_string())
}
