//! Robots.txt acquisition, on-disk caching, and evaluation.
//!
//! Grounded in `original_source/crawler/robochecks.py::RobotsChecker` /
//! `RobotsCache` (pickle-backed cache, fail-open on missing/invalid
//! robots.txt) and the grammar sketch in the teacher's own
//! `crawler/src/main.rs::parse_robots`/`path_allowed`, generalized to
//! support multiple `User-agent` groups with longest-match precedence.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

use crate::error::RobotsError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    body: Option<String>,
    fetched_at_epoch: u64,
}

/// A single `User-agent:` group parsed out of a robots.txt body.
#[derive(Debug, Clone)]
struct Group {
    agents: Vec<String>,
    rules: Vec<(bool, String)>, // (is_allow, pattern)
    crawl_delay: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct RobotsDoc {
    groups: Vec<Group>,
}

impl RobotsDoc {
    fn parse(body: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<Group> = None;
        let mut prev_was_agent = false;

        for line in body.lines() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, val)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let val = val.trim().to_string();

            match key.as_str() {
                "user-agent" => {
                    if prev_was_agent {
                        if let Some(g) = current.as_mut() {
                            g.agents.push(val);
                        }
                    } else {
                        if let Some(g) = current.take() {
                            groups.push(g);
                        }
                        current = Some(Group {
                            agents: vec![val],
                            rules: Vec::new(),
                            crawl_delay: None,
                        });
                    }
                    prev_was_agent = true;
                    continue;
                }
                "allow" => {
                    if let Some(g) = current.as_mut() {
                        if !val.is_empty() {
                            g.rules.push((true, val));
                        }
                    }
                }
                "disallow" => {
                    if let Some(g) = current.as_mut() {
                        g.rules.push((false, val));
                    }
                }
                "crawl-delay" => {
                    if let Some(g) = current.as_mut() {
                        g.crawl_delay = val.parse::<f64>().ok();
                    }
                }
                _ => {}
            }
            prev_was_agent = false;
        }
        if let Some(g) = current.take() {
            groups.push(g);
        }
        RobotsDoc { groups }
    }

    fn select_group(&self, user_agent: &str) -> Option<&Group> {
        let ua_lower = user_agent.to_lowercase();
        self.groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a.to_lowercase() == ua_lower))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
    }

    fn allowed(&self, path: &str, user_agent: &str) -> bool {
        let Some(group) = self.select_group(user_agent) else {
            return true;
        };
        path_allowed(path, &group.rules)
    }

    fn crawl_delay_ms(&self, user_agent: &str) -> Option<u64> {
        self.select_group(user_agent)
            .and_then(|g| g.crawl_delay)
            .map(|secs| (secs * 1000.0).round() as u64)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Longest matching `Allow`/`Disallow` pattern wins; ties favor `Allow`.
fn path_allowed(path: &str, rules: &[(bool, String)]) -> bool {
    let mut best_allow: Option<usize> = None;
    let mut best_disallow: Option<usize> = None;
    for (is_allow, pattern) in rules {
        if pattern.is_empty() {
            // An empty Disallow means "allow everything" per convention.
            if !is_allow {
                continue;
            }
        }
        if path.starts_with(pattern.as_str()) {
            let len = pattern.len();
            if *is_allow {
                if best_allow.map_or(true, |b| len > b) {
                    best_allow = Some(len);
                }
            } else if best_disallow.map_or(true, |b| len > b) {
                best_disallow = Some(len);
            }
        }
    }
    match (best_allow, best_disallow) {
        (Some(a), Some(d)) => a >= d,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => true,
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetaRobots {
    pub can_index: bool,
    pub can_follow: bool,
}

/// Parses a `<meta name="robots" content="...">` tag out of an HTML
/// document. Pure function; does not gate fetching (spec.md §4.2).
pub fn parse_meta_robots(html: &str) -> MetaRobots {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse(r#"meta[name="robots" i]"#)
        .expect("static selector is valid");
    let Some(el) = document.select(&selector).next() else {
        return MetaRobots { can_index: true, can_follow: true };
    };
    let content = el.value().attr("content").unwrap_or("").to_lowercase();
    MetaRobots {
        can_index: !content.contains("noindex"),
        can_follow: !content.contains("nofollow"),
    }
}

/// Fetches, caches, and evaluates robots.txt for arbitrary origins.
pub struct RobotsGate {
    client: Client,
    cache_path: PathBuf,
    ttl: Duration,
    fetch_timeout: Duration,
    user_agent: String,
    raw: Mutex<HashMap<String, StoredEntry>>,
    parsed: Mutex<HashMap<String, Arc<RobotsDoc>>>,
}

impl RobotsGate {
    pub fn new(
        client: Client,
        cache_path: impl AsRef<Path>,
        ttl: Duration,
        fetch_timeout: Duration,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cache_path: cache_path.as_ref().to_path_buf(),
            ttl,
            fetch_timeout,
            user_agent: user_agent.into(),
            raw: Mutex::new(HashMap::new()),
            parsed: Mutex::new(HashMap::new()),
        }
    }

    /// Load the on-disk cache, if any. Missing/corrupt files yield an
    /// empty cache rather than an error.
    pub fn load(&self) -> anyhow::Result<()> {
        let bytes = match fs::read(&self.cache_path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if let Ok(map) = bincode::deserialize::<HashMap<String, StoredEntry>>(&bytes) {
            *self.raw.lock() = map;
        }
        Ok(())
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = self.raw.lock().clone();
        let bytes = bincode::serialize(&snapshot)?;
        let tmp = self.cache_path.with_extension("bin.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.flush()?;
        }
        fs::rename(&tmp, &self.cache_path)?;
        Ok(())
    }

    fn origin(url: &url::Url) -> Result<String, RobotsError> {
        let host = url.host_str().ok_or(RobotsError::NoHost)?;
        Ok(match url.port() {
            Some(p) => format!("{}://{host}:{p}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        })
    }

    fn is_fresh(&self, entry: &StoredEntry) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(entry.fetched_at_epoch) < self.ttl.as_secs()
    }

    /// Ensures `origin`'s robots.txt is cached and fresh, fetching it if
    /// necessary. Fetch failures are recorded as a null body (fail-open).
    async fn ensure_cached(&self, origin: &str) {
        let needs_fetch = {
            let raw = self.raw.lock();
            match raw.get(origin) {
                Some(entry) => !self.is_fresh(entry),
                None => true,
            }
        };
        if !needs_fetch {
            return;
        }

        let robots_url = format!("{origin}/robots.txt");
        let body = self.fetch_body(&robots_url).await;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.parsed.lock().remove(origin);
        self.raw.lock().insert(
            origin.to_string(),
            StoredEntry { body, fetched_at_epoch: now },
        );
        if let Err(e) = self.save() {
            tracing::debug!(error = %e, "failed to persist robots cache");
        }
    }

    async fn fetch_body(&self, robots_url: &str) -> Option<String> {
        let resp = self
            .client
            .get(robots_url)
            .header(header::USER_AGENT, &self.user_agent)
            .timeout(self.fetch_timeout)
            .send()
            .await;
        match resp {
            Ok(r) if r.status() == reqwest::StatusCode::OK => {
                let ct_ok = r
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.starts_with("text/plain"))
                    .unwrap_or(false);
                if !ct_ok {
                    tracing::debug!(robots_url, "robots.txt has non-text/plain content-type");
                    return None;
                }
                r.text().await.ok()
            }
            Ok(r) => {
                tracing::debug!(robots_url, status = %r.status(), "robots.txt fetch non-200");
                None
            }
            Err(e) => {
                let err = RobotsError::Transport(e.to_string());
                tracing::debug!(robots_url, error = %err, "robots.txt fetch failed");
                None
            }
        }
    }

    fn doc_for(&self, origin: &str) -> Arc<RobotsDoc> {
        if let Some(doc) = self.parsed.lock().get(origin) {
            return doc.clone();
        }
        let body = self.raw.lock().get(origin).and_then(|e| e.body.clone());
        let doc = Arc::new(match body {
            Some(text) => RobotsDoc::parse(&text),
            None => RobotsDoc::default(),
        });
        self.parsed.lock().insert(origin.to_string(), doc.clone());
        doc
    }

    /// Deduplicates origins across `urls`, then fetches any
    /// missing/stale robots.txt entries concurrently with a bounded
    /// worker pool. After warming, `may_fetch` is a pure in-memory
    /// lookup.
    pub async fn warm(&self, urls: &[String], max_workers: usize) {
        let mut origins: Vec<String> = urls
            .iter()
            .filter_map(|u| url::Url::parse(u).ok())
            .filter_map(|u| Self::origin(&u).ok())
            .collect();
        origins.sort();
        origins.dedup();

        let chunks = origins.chunks(max_workers.max(1));
        for chunk in chunks {
            let futures: Vec<_> = chunk.iter().map(|origin| self.ensure_cached(origin)).collect();
            futures::future::join_all(futures).await;
        }
    }

    /// Decides whether `user_agent` may fetch `url`. Fails open (returns
    /// `true`) whenever no robots.txt was authoritatively retrieved.
    pub async fn may_fetch(&self, url: &str, user_agent: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let Ok(origin) = Self::origin(&parsed) else {
            return true;
        };
        self.ensure_cached(&origin).await;
        let doc = self.doc_for(&origin);
        doc.allowed(parsed.path(), user_agent)
    }

    /// Crawl-delay declared for `user_agent` at `url`'s origin, if any.
    /// Requires the origin to already be cached (call after `warm` or
    /// `may_fetch`).
    pub fn crawl_delay_ms(&self, url: &str, user_agent: &str) -> Option<u64> {
        let parsed = url::Url::parse(url).ok()?;
        let origin = Self::origin(&parsed).ok()?;
        if !self.raw.lock().contains_key(&origin) {
            return None;
        }
        self.doc_for(&origin).crawl_delay_ms(user_agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_groups_and_longest_match_wins() {
        let txt = "User-agent: Crawlzilla-1.0\nDisallow: /no-crawl/\nUser-agent: Crawlzilla-0.5\nDisallow: /\n";
        let doc = RobotsDoc::parse(txt);
        assert!(doc.allowed("/index.html", "Crawlzilla-1.0"));
        assert!(!doc.allowed("/no-crawl/test.html", "Crawlzilla-1.0"));
        assert!(!doc.allowed("/index.html", "Crawlzilla-0.5"));
    }

    #[test]
    fn unmatched_agent_falls_back_to_star() {
        let txt = "User-agent: *\nDisallow: /private\n";
        let doc = RobotsDoc::parse(txt);
        assert!(!doc.allowed("/private/x", "AnyBot/1.0"));
        assert!(doc.allowed("/public", "AnyBot/1.0"));
    }

    #[test]
    fn allow_overrides_shorter_disallow() {
        let txt = "User-agent: *\nDisallow: /images\nAllow: /images/public\n";
        let doc = RobotsDoc::parse(txt);
        assert!(doc.allowed("/images/public/a.png", "bot"));
        assert!(!doc.allowed("/images/private/a.png", "bot"));
    }

    #[test]
    fn crawl_delay_parses_to_millis() {
        let txt = "User-agent: *\nCrawl-delay: 2\n";
        let doc = RobotsDoc::parse(txt);
        assert_eq!(doc.crawl_delay_ms("bot"), Some(2000));
    }

    #[test]
    fn meta_robots_defaults_to_indexable_and_followable() {
        let meta = parse_meta_robots("<html><head></head><body></body></html>");
        assert!(meta.can_index);
        assert!(meta.can_follow);
    }

    #[test]
    fn meta_robots_parses_noindex_nofollow() {
        let meta = parse_meta_robots(
            r#"<html><head><meta name="robots" content="noindex, nofollow"></head></html>"#,
        );
        assert!(!meta.can_index);
        assert!(!meta.can_follow);
    }

    #[test]
    fn no_robots_txt_fails_open() {
        let doc = RobotsDoc::default();
        assert!(doc.allowed("/anything", "bot"));
    }
}
