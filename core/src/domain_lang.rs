//! Per-domain language-mix blacklist.
//!
//! Grounded in `original_source/crawler/crawler.py::DomainLanguageCounter`.
//! The original only ever fed target-language documents into its
//! per-domain counts (non-target documents return early in
//! `Parser.parse_line` before `domains2languages` is populated), which
//! made its off-target counter permanently zero and the blacklist
//! ratio dead code. spec.md §9 resolves this by counting every
//! detected language tag per domain, target and off-target alike, so
//! the ratio is actually meaningful (documented as an Open Question
//! resolution in DESIGN.md).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::url::bare_host;

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDisk {
    blacklist: HashSet<String>,
    domains: HashMap<String, HashMap<String, u64>>,
}

pub struct DomainLanguageCounter {
    path: PathBuf,
    target_languages: HashSet<String>,
    filter_n: u64,
    filter_ratio: f64,
    state: OnDisk,
}

impl DomainLanguageCounter {
    pub fn new(path: PathBuf, target_languages: &[String], filter_n: u64, filter_ratio: f64) -> Self {
        Self {
            path,
            target_languages: target_languages.iter().cloned().collect(),
            filter_n,
            filter_ratio,
            state: OnDisk::default(),
        }
    }

    /// Loads persisted counts. Missing or corrupt state starts empty.
    pub fn load(&mut self) {
        let Ok(raw) = fs::read(&self.path) else { return };
        if let Ok(state) = serde_json::from_slice(&raw) {
            self.state = state;
        }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&self.state)
            .context("serializing domain language counter")?;
        let mut tmp = self.path.clone();
        tmp.set_file_name(format!(
            "tmp_{}",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("domain_language_counter.json")
        ));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Folds one document's raw language counts into its domain's
    /// running totals, re-evaluating the blacklist threshold.
    pub fn add(&mut self, url: &str, language_counts: &HashMap<String, u32>) {
        let Some(domain) = bare_host(url) else { return };
        let entry = self.state.domains.entry(domain.clone()).or_default();
        for (language, count) in language_counts {
            *entry.entry(language.clone()).or_insert(0) += u64::from(*count);
        }

        let total: u64 = entry.values().sum();
        if total < self.filter_n {
            return;
        }
        let on_target: u64 = entry
            .iter()
            .filter(|(lang, _)| self.target_languages.contains(lang.as_str()))
            .map(|(_, count)| *count)
            .sum();
        let off_target = total - on_target;
        if off_target > 0 && (on_target as f64 / off_target as f64) < self.filter_ratio {
            self.state.blacklist.insert(domain);
        }
    }

    pub fn is_blacklisted(&self, url: &str) -> bool {
        match bare_host(url) {
            Some(domain) => self.state.blacklist.contains(&domain),
            None => false,
        }
    }

    /// Splits `urls` into (kept, dropped_count).
    pub fn filter_urls(&self, urls: Vec<String>) -> (Vec<String>, usize) {
        let total = urls.len();
        let kept: Vec<String> = urls.into_iter().filter(|u| !self.is_blacklisted(u)).collect();
        let dropped = total - kept.len();
        (kept, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn counts(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn blacklists_domain_once_threshold_and_ratio_are_crossed() {
        let dir = tempdir().unwrap();
        let mut counter = DomainLanguageCounter::new(
            dir.path().join("domain_language_counter.json"),
            &["kin_Latn".to_string()],
            10,
            0.2,
        );
        for _ in 0..9 {
            counter.add("https://spam.example/page", &counts(&[("eng_Latn", 1)]));
        }
        assert!(!counter.is_blacklisted("https://spam.example/other"));
        counter.add("https://spam.example/page", &counts(&[("eng_Latn", 1)]));
        assert!(counter.is_blacklisted("https://spam.example/other"));
    }

    #[test]
    fn majority_target_language_domain_is_not_blacklisted() {
        let dir = tempdir().unwrap();
        let mut counter = DomainLanguageCounter::new(
            dir.path().join("domain_language_counter.json"),
            &["kin_Latn".to_string()],
            10,
            0.2,
        );
        for _ in 0..20 {
            counter.add("https://good.example/page", &counts(&[("kin_Latn", 1)]));
        }
        assert!(!counter.is_blacklisted("https://good.example/other"));
    }

    #[test]
    fn persists_and_reloads_blacklist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domain_language_counter.json");
        let mut counter = DomainLanguageCounter::new(path.clone(), &["kin_Latn".to_string()], 2, 0.5);
        counter.add("https://spam.example/a", &counts(&[("eng_Latn", 5)]));
        counter.save().unwrap();

        let mut reloaded = DomainLanguageCounter::new(path, &["kin_Latn".to_string()], 2, 0.5);
        reloaded.load();
        assert!(reloaded.is_blacklisted("https://spam.example/b"));
    }

    #[test]
    fn filter_urls_reports_dropped_count() {
        let dir = tempdir().unwrap();
        let mut counter = DomainLanguageCounter::new(
            dir.path().join("domain_language_counter.json"),
            &["kin_Latn".to_string()],
            1,
            0.5,
        );
        counter.add("https://spam.example/a", &counts(&[("eng_Latn", 3)]));
        let (kept, dropped) =
            counter.filter_urls(vec!["https://spam.example/b".into(), "https://good.example/c".into()]);
        assert_eq!(kept, vec!["https://good.example/c".to_string()]);
        assert_eq!(dropped, 1);
    }
}
