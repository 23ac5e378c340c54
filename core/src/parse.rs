//! Parses a single downloaded page: paragraph extraction + language
//! identification, the language-mix gate, and same-host link
//! extraction.
//!
//! Grounded in `original_source/crawler/crawler.py::Parser.parse_line`
//! / `Parser.extract_urls`, generalized per spec.md §4.6 (multi-segment
//! gate instead of the original's single-dominant-language check) and
//! with meta-robots wiring per spec.md §9's resolved Open Question.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use scraper::{Html, Selector};

use crate::config::CrawlerConfig;
use crate::extract::extract_paragraphs;
use crate::langid::LanguageIdentifier;
use crate::records::{ParsedDocument, RawRecord, Segment};
use crate::robots::parse_meta_robots;
use crate::url::same_host;

pub struct ParseOutcome {
    pub doc: ParsedDocument,
    /// Every detected segment's language tag, before filtering to the
    /// target list — feeds the per-domain language blacklist (§4.7 ADD).
    pub all_language_counts: HashMap<String, u32>,
}

#[derive(Clone)]
pub struct Parser {
    target_languages: HashSet<String>,
    language_mix_threshold: f64,
    langid: LanguageIdentifier,
}

impl Parser {
    pub fn new(config: &CrawlerConfig, langid: LanguageIdentifier) -> Self {
        Self {
            target_languages: config.languages.iter().cloned().collect(),
            language_mix_threshold: config.language_mix_threshold,
            langid,
        }
    }

    /// Parses one raw record. Returns `None` for records that never
    /// had a retained body (non-2xx, wrong content-type, transport
    /// error) — those never reach the Parser per spec.md §4.6.
    pub fn parse_record(&self, record: &RawRecord) -> Result<Option<ParseOutcome>> {
        let Some(body) = record.body() else { return Ok(None) };

        let paragraphs = extract_paragraphs(body);
        let mut tagged: Vec<(String, String)> = Vec::with_capacity(paragraphs.len());
        let mut all_counts: HashMap<String, u32> = HashMap::new();
        for paragraph in paragraphs {
            let tag = self.langid.identify(&paragraph)?;
            *all_counts.entry(tag.clone()).or_insert(0) += 1;
            tagged.push((paragraph, tag));
        }

        let total = tagged.len();
        let on_target = tagged.iter().filter(|(_, tag)| self.target_languages.contains(tag)).count();

        let meta = parse_meta_robots(body);
        let mut discard_content = !meta.can_index;
        if total >= 1 {
            let ratio = on_target as f64 / total as f64;
            if ratio < self.language_mix_threshold {
                discard_content = true;
            }
        }

        let segments: Vec<Segment> = if discard_content {
            Vec::new()
        } else {
            tagged
                .into_iter()
                .filter(|(_, tag)| self.target_languages.contains(tag))
                .map(|(text, language_tag)| Segment { text, language_tag })
                .collect()
        };

        let parsed_urls = if discard_content || !meta.can_follow {
            Vec::new()
        } else {
            extract_links(body, &record.url)
        };

        Ok(Some(ParseOutcome {
            doc: ParsedDocument { url: record.url.clone(), segments, parsed_urls },
            all_language_counts: all_counts,
        }))
    }
}

fn find_base_href(document: &Html) -> Option<String> {
    let selector = Selector::parse("base").ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr("href"))
        .map(str::to_string)
}

/// Extracts unique, same-host, internal outbound links in discovery
/// order (spec.md §4.6).
pub fn extract_links(html: &str, source_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let base = find_base_href(&document).unwrap_or_else(|| source_url.to_string());
    let base_url = url::Url::parse(&base).ok();

    let Ok(selector) = Selector::parse("a") else { return Vec::new() };
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else { continue };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href == "./" {
            continue;
        }
        let without_fragment = href.split('#').next().unwrap_or("");
        if without_fragment.is_empty() {
            continue;
        }

        let resolved = match &base_url {
            Some(base) => base.join(without_fragment).ok(),
            None => url::Url::parse(without_fragment).ok(),
        };
        let Some(resolved) = resolved else { continue };

        let mut resolved_str = resolved.to_string();
        if !resolved_str.starts_with("http") {
            continue;
        }
        if resolved_str.ends_with('/') {
            resolved_str.pop();
        }
        if !same_host(&resolved_str, source_url) {
            continue;
        }
        if seen.insert(resolved_str.clone()) {
            out.push(resolved_str);
        }
    }
    out
}
