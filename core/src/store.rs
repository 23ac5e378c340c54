//! Durable URL set abstractions backing the Frontier (to-fetch) and
//! History (already-fetched) stores.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// An ordered, de-duplicated sequence of URLs persisted one per line.
///
/// Used for both the Frontier (order matters: URLs are selected in
/// insertion order) and the History (order is irrelevant but preserved
/// for simplicity and to keep a single implementation).
#[derive(Debug, Default)]
pub struct UrlStore {
    path: PathBuf,
    order: Vec<String>,
    index: HashSet<String>,
}

impl UrlStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            order: Vec::new(),
            index: HashSet::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Best-effort read from the backing file. A missing file yields an
    /// empty store rather than an error.
    pub fn load(&mut self) -> Result<()> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).context(format!("opening {}", self.path.display())),
        };
        self.order.clear();
        self.index.clear();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if self.index.insert(trimmed.to_string()) {
                self.order.push(trimmed.to_string());
            }
        }
        Ok(())
    }

    /// Append URLs, preserving insertion order. Callers must pre-filter
    /// for existing membership if avoiding duplicates matters, but
    /// exact duplicates of URLs already in this store are silently
    /// skipped (the store itself never holds a URL twice).
    pub fn add_many<I: IntoIterator<Item = String>>(&mut self, urls: I) {
        for url in urls {
            if self.index.insert(url.clone()) {
                self.order.push(url);
            }
        }
    }

    /// Set-difference against the in-memory sequence.
    pub fn remove<'a, I: IntoIterator<Item = &'a str>>(&mut self, urls: I) {
        let gone: HashSet<&str> = urls.into_iter().collect();
        if gone.is_empty() {
            return;
        }
        self.order.retain(|u| !gone.contains(u.as_str()));
        self.index.retain(|u| !gone.contains(u.as_str()));
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains(url)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Rewrite the backing file atomically: write to a temp name, then
    /// rename. Empty lines are dropped, matching `load`.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp_path)
                .with_context(|| format!("creating {}", tmp_path.display()))?;
            for url in &self.order {
                let trimmed = url.trim();
                if trimmed.is_empty() {
                    continue;
                }
                writeln!(f, "{trimmed}")?;
            }
            f.flush()?;
        }
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming {} -> {}", tmp_path.display(), self.path.display()))?;
        Ok(())
    }
}
