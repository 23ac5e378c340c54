//! Crawl configuration, threaded through every component.
//!
//! Mirrors `original_source/crawler/crawler.py::CrawlerConfig`: one
//! struct built once at startup (from CLI args in the `crawler` binary)
//! and passed by reference to the stores, fetcher, parser and round
//! coordinator.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub output_folder: PathBuf,
    pub languages: Vec<String>,
    pub num_rounds: i64,
    pub round_size: usize,
    pub download_batch_size: usize,
    pub download_n_threads: usize,
    pub request_timeout_secs: u64,
    pub download_sleep_time_ms: u64,
    pub accept_content_types: Vec<(String, String)>,
    pub user_agent: String,
    pub dont_compress_outputs: bool,
    pub delete_html: bool,
    pub delete_parsed: bool,
    pub robots_cache_ttl_secs: u64,
    pub robots_warm_workers: usize,
    pub robots_fetch_timeout_secs: u64,
    pub lid_model_path: PathBuf,
    pub crawl_delay_ms_floor: u64,
    pub max_response_bytes: usize,
    /// Minimum total segments observed for a domain before the
    /// language-mix blacklist can trigger (§4.7 domain blacklist).
    pub domain_language_filter_n: u32,
    /// Minimum ratio of target-language to off-target segments a
    /// domain must maintain once `domain_language_filter_n` is reached.
    pub domain_language_filter_ratio: f64,
    /// Language-mix gate threshold for a single document (spec.md §4.6).
    pub language_mix_threshold: f64,
}

impl CrawlerConfig {
    pub fn new(output_folder: impl AsRef<Path>, languages: Vec<String>) -> Self {
        Self {
            output_folder: output_folder.as_ref().to_path_buf(),
            languages,
            num_rounds: -1,
            round_size: 1000,
            download_batch_size: 250,
            download_n_threads: 10,
            request_timeout_secs: 12,
            download_sleep_time_ms: 100,
            accept_content_types: vec![("text/html".to_string(), "html".to_string())],
            user_agent: "Crawlzilla/1.0".to_string(),
            dont_compress_outputs: false,
            delete_html: false,
            delete_parsed: false,
            robots_cache_ttl_secs: 24 * 60 * 60,
            robots_warm_workers: 5,
            robots_fetch_timeout_secs: 10,
            lid_model_path: PathBuf::from("models/lid.176.bin"),
            crawl_delay_ms_floor: 0,
            max_response_bytes: 2 * 1024 * 1024,
            domain_language_filter_n: 10,
            domain_language_filter_ratio: 0.2,
            language_mix_threshold: 0.80,
        }
    }

    pub fn html_dir(&self) -> PathBuf {
        self.output_folder.join("html")
    }

    pub fn parsed_dir(&self) -> PathBuf {
        self.output_folder.join("parsed")
    }

    pub fn text_dir(&self) -> PathBuf {
        self.output_folder.join("textual_outputs")
    }

    pub fn frontier_path(&self) -> PathBuf {
        self.output_folder.join("urls2download.txt")
    }

    pub fn history_path(&self) -> PathBuf {
        self.output_folder.join("downloaded_urls.txt")
    }

    pub fn robots_cache_path(&self) -> PathBuf {
        self.output_folder.join("robots_cache.bin")
    }

    pub fn domain_language_counter_path(&self) -> PathBuf {
        self.output_folder.join("domain_language_counter.json")
    }

    pub fn round_extension(&self) -> &'static str {
        if self.dont_compress_outputs {
            "json"
        } else {
            "json.gz"
        }
    }

    pub fn round_file_name(&self, round: u32) -> String {
        format!("{round:05}.{}", self.round_extension())
    }
}
