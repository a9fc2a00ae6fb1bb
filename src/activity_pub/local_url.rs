use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Url;

use crate::activity_pub::repo::{ContentKind, EntityKey};
use crate::config::InboxConfig;

/// Host and path predicates over IRIs: local vs. remote, banned instances and
/// the local content URL shapes used to resolve report subjects.
#[derive(Clone, Debug)]
pub(crate) struct UrlMatcher {
    base_url: String,
    local_host: String,
    banned: Vec<String>,
    random_magazine: String,
    patterns: Vec<(ContentKind, Regex)>,
}

impl UrlMatcher {
    pub(crate) fn new(config: &InboxConfig) -> Result<UrlMatcher> {
        let base = Url::parse(&config.base_url).context("base_url is not a valid URL")?;
        let local_host = base
            .host_str()
            .context("base_url has no host")?
            .to_ascii_lowercase();
        let patterns = &config.report_patterns;
        // comment shapes first, they extend the entry and post shapes
        let patterns = [
            (ContentKind::EntryComment, &patterns.entry_comment),
            (ContentKind::PostComment, &patterns.post_comment),
            (ContentKind::Entry, &patterns.entry),
            (ContentKind::Post, &patterns.post),
        ]
        .into_iter()
        .map(|(kind, pattern)| {
            let regex = Regex::new(pattern)
                .with_context(|| format!("invalid report pattern for {kind:?}"))?;
            if !regex.capture_names().flatten().any(|name| name == "id") {
                anyhow::bail!("report pattern for {kind:?} has no `id` capture");
            }
            Ok((kind, regex))
        })
        .collect::<Result<Vec<_>>>()?;
        Ok(UrlMatcher {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            local_host,
            banned: config
                .banned_instances
                .iter()
                .map(|domain| domain.to_ascii_lowercase())
                .collect(),
            random_magazine: config.random_magazine.clone(),
            patterns,
        })
    }

    pub(crate) fn host_of(iri: &str) -> Option<String> {
        let url = Url::parse(iri).ok()?;
        url.host_str().map(|host| host.to_ascii_lowercase())
    }

    pub(crate) fn same_host(a: &str, b: &str) -> bool {
        match (Self::host_of(a), Self::host_of(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn is_local(&self, iri: &str) -> bool {
        Self::host_of(iri).is_some_and(|host| host == self.local_host)
    }

    pub(crate) fn is_banned_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.banned.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }

    pub(crate) fn is_banned(&self, iri: &str) -> bool {
        Self::host_of(iri).is_some_and(|host| self.is_banned_host(&host))
    }

    /// Kind and key of local content addressed by `iri`, by path shape.
    pub(crate) fn local_content(&self, iri: &str) -> Option<(ContentKind, EntityKey)> {
        if !self.is_local(iri) {
            return None;
        }
        let url = Url::parse(iri).ok()?;
        self.patterns.iter().find_map(|(kind, regex)| {
            let captures = regex.captures(url.path())?;
            let key = captures.name("id")?.as_str().parse().ok()?;
            Some((*kind, key))
        })
    }

    pub(crate) fn magazine_iri(&self, name: &str) -> String {
        format!("{}/m/{name}", self.base_url)
    }

    pub(crate) fn random_magazine_iri(&self) -> String {
        self.magazine_iri(&self.random_magazine)
    }

    /// Canonical URL of local content. Comments live under their thread root.
    pub(crate) fn content_iri(
        &self,
        magazine: &str,
        kind: ContentKind,
        key: EntityKey,
        root: Option<EntityKey>,
    ) -> String {
        let base = &self.base_url;
        let root = root.unwrap_or(key);
        match kind {
            ContentKind::Entry => format!("{base}/m/{magazine}/t/{key}"),
            ContentKind::Post => format!("{base}/m/{magazine}/p/{key}"),
            ContentKind::EntryComment => format!("{base}/m/{magazine}/t/{root}/comment/{key}"),
            ContentKind::PostComment => format!("{base}/m/{magazine}/p/{root}/reply/{key}"),
        }
    }

    /// Fresh IRI for an activity this instance emits.
    pub(crate) fn activity_iri(&self) -> String {
        format!("{}/f/object/{}", self.base_url, EntityKey::new())
    }
}
