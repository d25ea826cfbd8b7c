//! Combines the bundles of several sources into one.

use crate::config::SourceKind;
use crate::source::{MediaBundle, SourceError};

/// Merged bundle plus the failures that were left out of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The combined bundle; `error` is never set.
    pub bundle: MediaBundle,
    /// Sources that failed, in priority order.
    pub failures: Vec<(SourceKind, SourceError)>,
}

/// Merges bundles by source priority.
///
/// Scalar fields come from the highest-priority source that set them. Media
/// lists are unioned in priority order without duplicates. Failed bundles
/// contribute only their error.
#[must_use]
pub fn merge_bundles(mut bundles: Vec<(SourceKind, MediaBundle)>) -> MergeOutcome {
    bundles.sort_by_key(|(kind, _)| *kind);
    let mut outcome = MergeOutcome::default();

    for (kind, bundle) in bundles {
        if let Some(error) = bundle.error {
            outcome.failures.push((kind, error));
            continue;
        }
        let merged = &mut outcome.bundle;
        fill(&mut merged.name, bundle.name);
        fill(&mut merged.username, bundle.username);
        fill(&mut merged.user_id, bundle.user_id);
        fill(&mut merged.avatar, bundle.avatar);
        fill(&mut merged.bio, bundle.bio);
        fill(&mut merged.website, bundle.website);
        fill(&mut merged.location, bundle.location);
        fill(&mut merged.joined, bundle.joined);
        fill(&mut merged.birthday, bundle.birthday);
        fill(&mut merged.text, bundle.text);
        if merged.timestamp.is_none() {
            merged.timestamp = bundle.timestamp;
        }
        merged.is_video |= bundle.is_video;
        union_into(&mut merged.media, bundle.media);
        union_into(&mut merged.quote_media, bundle.quote_media);
    }
    outcome
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value.filter(|v| !v.trim().is_empty());
    }
}

/// Appends the items of `extra` that `target` does not hold yet.
pub(crate) fn union_into(target: &mut Vec<String>, extra: impl IntoIterator<Item = String>) {
    for item in extra {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(name: Option<&str>, media: &[&str]) -> MediaBundle {
        MediaBundle {
            name: name.map(ToString::to_string),
            media: media.iter().map(ToString::to_string).collect(),
            ..MediaBundle::default()
        }
    }

    #[test]
    fn test_priority_wins_regardless_of_input_order() {
        let outcome = merge_bundles(vec![
            (SourceKind::Direct, bundle(Some("direct"), &["b", "c"])),
            (SourceKind::Mirror, bundle(Some("mirror"), &["a", "b"])),
        ]);
        assert_eq!(outcome.bundle.name.as_deref(), Some("mirror"));
        assert_eq!(outcome.bundle.media, vec!["a", "b", "c"]);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_lower_priority_fills_unset_fields() {
        let mut direct = bundle(Some("direct"), &[]);
        direct.user_id = Some("42".to_string());
        direct.birthday = Some("Born 1 Jan".to_string());
        let outcome = merge_bundles(vec![
            (SourceKind::Mirror, bundle(None, &["a"])),
            (SourceKind::Direct, direct),
        ]);
        assert_eq!(outcome.bundle.name.as_deref(), Some("direct"));
        assert_eq!(outcome.bundle.user_id.as_deref(), Some("42"));
        assert_eq!(outcome.bundle.birthday.as_deref(), Some("Born 1 Jan"));
    }

    #[test]
    fn test_failed_bundles_only_contribute_errors() {
        let outcome = merge_bundles(vec![
            (SourceKind::Mirror, MediaBundle::failed(SourceError::not_found("gone"))),
            (SourceKind::Direct, bundle(Some("direct"), &["x"])),
        ]);
        assert_eq!(outcome.bundle.media, vec!["x"]);
        assert_eq!(outcome.bundle.error, None);
        assert_eq!(
            outcome.failures,
            vec![(SourceKind::Mirror, SourceError::not_found("gone"))]
        );
    }

    #[test]
    fn test_is_video_from_any_source() {
        let mut video = bundle(None, &[]);
        video.is_video = true;
        let outcome = merge_bundles(vec![
            (SourceKind::Mirror, bundle(None, &[])),
            (SourceKind::Browser, video),
        ]);
        assert!(outcome.bundle.is_video);
    }
}
