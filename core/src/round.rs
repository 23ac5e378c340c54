//! Round coordinator: Select → Download → Parse → Cleanup, repeated
//! until the Frontier is empty or `num_rounds` is reached.
//!
//! Grounded in `original_source/crawler/crawler.py::Crawler.round` /
//! `main`, generalized per spec.md §4.7-4.8 (resumability, cleanup
//! flags, domain language blacklist).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::thread_rng;
use reqwest::Client;
use std::time::Duration;

use crate::config::CrawlerConfig;
use crate::domain_lang::DomainLanguageCounter;
use crate::fetch::Fetcher;
use crate::parse::Parser;
use crate::records::{read_jsonl, RawRecord, RoundFileWriter};
use crate::robots::RobotsGate;
use crate::store::UrlStore;

pub struct RoundCoordinator {
    config: Arc<CrawlerConfig>,
    fetcher: Fetcher,
    parser: Parser,
    robots: Arc<RobotsGate>,
    frontier: UrlStore,
    history: UrlStore,
    domain_language_counter: DomainLanguageCounter,
}

impl RoundCoordinator {
    pub fn new(config: CrawlerConfig, client: Client, parser: Parser) -> Self {
        let config = Arc::new(config);
        let robots = Arc::new(RobotsGate::new(
            client.clone(),
            config.robots_cache_path(),
            Duration::from_secs(config.robots_cache_ttl_secs),
            Duration::from_secs(config.robots_fetch_timeout_secs),
            config.user_agent.clone(),
        ));
        let fetcher = Fetcher::new(client, config.clone(), robots.clone());
        let frontier = UrlStore::new(config.frontier_path());
        let history = UrlStore::new(config.history_path());
        let domain_language_counter = DomainLanguageCounter::new(
            config.domain_language_counter_path(),
            &config.languages,
            u64::from(config.domain_language_filter_n),
            config.domain_language_filter_ratio,
        );
        Self { config, fetcher, parser, robots, frontier, history, domain_language_counter }
    }

    /// Loads all persisted state (Frontier, History, robots cache,
    /// domain language counter). Seeds the Frontier with `seed_urls`,
    /// shuffled, only if it doesn't already exist on disk.
    pub fn bootstrap(&mut self, seed_urls: Vec<String>) -> Result<()> {
        self.robots.load().context("loading robots cache")?;
        self.domain_language_counter.load();
        self.history.load().context("loading history store")?;

        if self.frontier.exists() {
            self.frontier.load().context("loading frontier store")?;
        } else {
            let mut seeds = seed_urls;
            seeds.shuffle(&mut thread_rng());
            self.frontier.add_many(seeds);
            self.frontier.persist()?;
        }
        Ok(())
    }

    /// Runs rounds until the Frontier is exhausted or `num_rounds` is
    /// reached (a negative value means unbounded).
    pub async fn run(&mut self) -> Result<()> {
        let mut round: u32 = 1;
        loop {
            if self.config.num_rounds >= 0 && i64::from(round) > self.config.num_rounds {
                tracing::info!(rounds = round - 1, "reached configured round limit");
                break;
            }
            if self.frontier.is_empty() {
                tracing::info!("frontier exhausted, stopping");
                break;
            }
            self.run_round(round).await?;
            round += 1;
        }
        Ok(())
    }

    async fn run_round(&mut self, round: u32) -> Result<()> {
        let file_name = self.config.round_file_name(round);
        let html_path = self.config.html_dir().join(&file_name);
        let parsed_path = self.config.parsed_dir().join(&file_name);

        if html_path.exists() && parsed_path.exists() {
            tracing::info!(round, "skipping round, both raw and parsed files already exist");
            return Ok(());
        }

        tracing::info!(round, frontier = self.frontier.len(), history = self.history.len(), "starting round");

        if !html_path.exists() {
            self.download_round(round, &html_path).await?;
        }
        if !parsed_path.exists() {
            self.parse_round(round, &html_path, &parsed_path).await?;
        }
        self.cleanup_round(&html_path, &parsed_path);
        Ok(())
    }

    async fn download_round(&mut self, round: u32, html_path: &std::path::Path) -> Result<()> {
        let mut selected = Vec::new();
        for url in self.frontier.iter() {
            if selected.len() >= self.config.round_size {
                break;
            }
            if url.trim().is_empty() || self.history.contains(url) {
                continue;
            }
            if self.domain_language_counter.is_blacklisted(url) {
                continue;
            }
            selected.push(url.to_string());
        }

        let mut writer = RoundFileWriter::create(html_path.to_path_buf(), !self.config.dont_compress_outputs)?;
        self.robots.warm(&selected, self.config.robots_warm_workers).await;
        let with_body = self.fetcher.download_round(&selected, &mut writer).await?;
        writer.finish()?;
        tracing::info!(round, selected = selected.len(), with_body, "download complete");

        self.frontier.remove(selected.iter().map(|s| s.as_str()));
        self.frontier.persist()?;
        self.history.add_many(selected);
        self.history.persist()?;
        Ok(())
    }

    async fn parse_round(
        &mut self,
        round: u32,
        html_path: &std::path::Path,
        parsed_path: &std::path::Path,
    ) -> Result<()> {
        let records = read_jsonl::<RawRecord>(html_path)?;
        let mut writer = RoundFileWriter::create(parsed_path.to_path_buf(), !self.config.dont_compress_outputs)?;

        let mut new_urls: Vec<String> = Vec::new();
        let mut shard_writers: HashMap<String, RoundFileWriter> = HashMap::new();
        let shard_stem = parsed_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.split('.').next().unwrap_or(s).to_string())
            .unwrap_or_else(|| format!("{round:05}"));

        for batch in chunk_results(records, 100) {
            // Each record's extraction + language identification runs on
            // a blocking-pool task; handles are awaited in submission
            // order so output writes stay serialized and deterministic.
            // A malformed raw line or a parse failure is logged and
            // skipped rather than aborting the round: since the raw file
            // is immutable once written, propagating the error here
            // would wedge every retry of this round on the same record.
            let mut handles = Vec::with_capacity(batch.len());
            for item in batch {
                let record = match item {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping malformed raw record");
                        continue;
                    }
                };
                let url = record.url.clone();
                let parser = self.parser.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let outcome = parser.parse_record(&record);
                    (record, outcome)
                });
                handles.push((url, handle));
            }

            for (url, handle) in handles {
                let (record, outcome) = match handle.await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::debug!(url, error = %e, "parser task panicked, skipping record");
                        continue;
                    }
                };
                let outcome = match outcome {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::debug!(url = %record.url, error = %e, "skipping record that failed to parse");
                        continue;
                    }
                };

                self.domain_language_counter.add(&record.url, &outcome.all_language_counts);

                writer.write_line(&outcome.doc)?;
                new_urls.extend(outcome.doc.parsed_urls.iter().cloned());

                for segment in &outcome.doc.segments {
                    let shard = if shard_writers.contains_key(&segment.language_tag) {
                        shard_writers.get_mut(&segment.language_tag).unwrap()
                    } else {
                        let shard_name = format!("{shard_stem}_{}.txt", segment.language_tag);
                        let shard = RoundFileWriter::create(self.config.text_dir().join(shard_name), false)?;
                        shard_writers.entry(segment.language_tag.clone()).or_insert(shard)
                    };
                    shard.write_raw_line(&segment.text)?;
                }
            }
        }

        writer.finish()?;
        for (_, shard) in shard_writers {
            shard.finish()?;
        }
        self.domain_language_counter.save()?;

        let existing_new: Vec<String> = new_urls
            .into_iter()
            .filter(|u| !self.history.contains(u) && !self.frontier.contains(u))
            .collect();
        let (kept, dropped) = self.domain_language_counter.filter_urls(existing_new);
        if dropped > 0 {
            tracing::debug!(dropped, "dropped newly discovered URLs from blacklisted domains");
        }
        let mut kept = kept;
        kept.shuffle(&mut thread_rng());
        tracing::info!(round, new_urls = kept.len(), "parse complete");
        self.frontier.add_many(kept);
        self.frontier.persist()?;
        Ok(())
    }

    fn cleanup_round(&self, html_path: &std::path::Path, parsed_path: &std::path::Path) {
        if self.config.delete_html {
            if let Err(e) = std::fs::remove_file(html_path) {
                tracing::debug!(error = %e, path = %html_path.display(), "failed to delete raw round file");
            }
        }
        if self.config.delete_parsed {
            if let Err(e) = std::fs::remove_file(parsed_path) {
                tracing::debug!(error = %e, path = %parsed_path.display(), "failed to delete parsed round file");
            }
        }
    }
}

/// Groups a lazy iterator of results into owned chunks of at most
/// `size`, mirroring `original_source`'s `iterate_batches` generator.
fn chunk_results<T>(
    iter: impl Iterator<Item = Result<T, serde_json::Error>>,
    size: usize,
) -> impl Iterator<Item = Vec<Result<T, serde_json::Error>>> {
    struct Chunks<I, T> {
        iter: I,
        size: usize,
        _marker: std::marker::PhantomData<T>,
    }
    impl<I: Iterator<Item = Result<T, serde_json::Error>>, T> Iterator for Chunks<I, T> {
        type Item = Vec<Result<T, serde_json::Error>>;
        fn next(&mut self) -> Option<Self::Item> {
            let mut batch = Vec::with_capacity(self.size);
            for item in self.iter.by_ref().take(self.size) {
                batch.push(item);
            }
            if batch.is_empty() {
                None
            } else {
                Some(batch)
            }
        }
    }
    Chunks { iter, size, _marker: std::marker::PhantomData }
}
