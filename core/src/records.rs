//! On-disk record shapes (`RawRecord`, `ParsedDocument`) and the
//! append-only JSONL writer discipline (temp file + atomic rename)
//! shared by the raw dump, parsed document, and text shard files.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// The outcome of attempting to download a single URL. Modeled as a
/// tagged variant at the type layer (spec.md §9 design note) but
/// serialized to a single flat JSON object for on-disk compatibility.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 2xx with an acceptable, retained Content-Type.
    Success { headers: HashMap<String, String>, body: String },
    /// 2xx, or a content type the crawler chose not to retain.
    HttpNoBody { headers: HashMap<String, String> },
    /// DNS/TCP/TLS/timeout/decode failure; no headers were ever read.
    TransportError { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub url: String,
    pub status: i32,
    pub outcome: FetchOutcome,
}

impl RawRecord {
    pub fn success(url: String, status: i32, headers: HashMap<String, String>, body: String) -> Self {
        Self { url, status, outcome: FetchOutcome::Success { headers, body } }
    }

    pub fn http_no_body(url: String, status: i32, headers: HashMap<String, String>) -> Self {
        Self { url, status, outcome: FetchOutcome::HttpNoBody { headers } }
    }

    pub fn transport_error(url: String, error: String) -> Self {
        Self { url, status: -1, outcome: FetchOutcome::TransportError { error } }
    }

    pub fn body(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Success { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Success { .. })
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("url", &self.url)?;
        map.serialize_entry("status", &self.status)?;
        match &self.outcome {
            FetchOutcome::Success { headers, body } => {
                map.serialize_entry("headers", headers)?;
                map.serialize_entry("html", body)?;
            }
            FetchOutcome::HttpNoBody { headers } => {
                map.serialize_entry("headers", headers)?;
            }
            FetchOutcome::TransportError { error } => {
                map.serialize_entry("error", error)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawRecordVisitor;

        impl<'de> Visitor<'de> for RawRecordVisitor {
            type Value = RawRecord;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a raw record JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawRecord, A::Error> {
                let mut url: Option<String> = None;
                let mut status: Option<i32> = None;
                let mut headers: Option<HashMap<String, String>> = None;
                let mut body: Option<String> = None;
                let mut error: Option<String> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "url" => url = Some(map.next_value()?),
                        "status" => status = Some(map.next_value()?),
                        "headers" => headers = Some(map.next_value()?),
                        "html" | "body" => body = Some(map.next_value()?),
                        "error" => error = Some(map.next_value()?),
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }

                let url = url.ok_or_else(|| de::Error::missing_field("url"))?;
                let status = status.ok_or_else(|| de::Error::missing_field("status"))?;

                let outcome = if let Some(error) = error {
                    FetchOutcome::TransportError { error }
                } else if let Some(body) = body {
                    FetchOutcome::Success { headers: headers.unwrap_or_default(), body }
                } else {
                    FetchOutcome::HttpNoBody { headers: headers.unwrap_or_default() }
                };

                Ok(RawRecord { url, status, outcome })
            }
        }

        deserializer.deserialize_map(RawRecordVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub text: String,
    pub language_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ParsedDocument {
    pub url: String,
    pub segments: Vec<Segment>,
    pub parsed_urls: Vec<String>,
}

/// Opens a line reader over a JSONL file, transparently decompressing
/// gzip based on the `.gz` extension. Lazy: lines are read one at a
/// time, never loading the whole file into memory.
pub fn open_line_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// An append-only JSONL writer that becomes visible only via atomic
/// rename from a temporary name on `finish`.
pub struct RoundFileWriter {
    inner: Box<dyn Write>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl RoundFileWriter {
    pub fn create(final_path: PathBuf, compress: bool) -> Result<Self> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_path = final_path.clone();
        tmp_path.set_file_name(format!(
            "tmp_{}",
            final_path.file_name().and_then(|n| n.to_str()).unwrap_or("round")
        ));
        let file = fs::File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        let inner: Box<dyn Write> = if compress {
            Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
        } else {
            Box::new(BufWriter::new(file))
        };
        Ok(Self { inner, tmp_path, final_path })
    }

    pub fn write_line<T: Serialize>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.inner, value)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    /// Writes `line` verbatim followed by a newline, with no JSON
    /// encoding — used for the plain-text per-language shards.
    pub fn write_raw_line(&mut self, line: &str) -> Result<()> {
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    /// Flushes and atomically renames the temp file into place. On any
    /// earlier error the caller should drop this writer without calling
    /// `finish` so the temp file is left behind for inspection and the
    /// round is retried from scratch on next run.
    pub fn finish(mut self) -> Result<()> {
        self.inner.flush()?;
        drop(self.inner);
        fs::rename(&self.tmp_path, &self.final_path).with_context(|| {
            format!("renaming {} -> {}", self.tmp_path.display(), self.final_path.display())
        })?;
        Ok(())
    }
}

/// Reads an entire JSONL file's lines lazily, parsing each into `T`.
/// Malformed lines are reported to the caller via the `Result` item
/// rather than aborting the stream.
pub fn read_jsonl<T: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<impl Iterator<Item = Result<T, serde_json::Error>>> {
    let reader = open_line_reader(path)?;
    Ok(reader.lines().filter_map(|line| match line {
        Ok(l) if l.trim().is_empty() => None,
        Ok(l) => Some(serde_json::from_str::<T>(&l)),
        Err(e) => Some(Err(serde_json::Error::from(e))),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn raw_record_round_trip_success() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        let rec = RawRecord::success("https://a.com".into(), 200, headers, "<html></html>".into());
        let json = serde_json::to_string(&rec).unwrap();
        let back: RawRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn raw_record_round_trip_transport_error() {
        let rec = RawRecord::transport_error("https://a.com".into(), "timeout".into());
        let json = serde_json::to_string(&rec).unwrap();
        let back: RawRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
        assert_eq!(back.status, -1);
    }

    #[test]
    fn raw_record_round_trip_http_no_body() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/pdf".to_string());
        let rec = RawRecord::http_no_body("https://a.com".into(), 200, headers);
        let json = serde_json::to_string(&rec).unwrap();
        let back: RawRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
        assert!(back.body().is_none());
    }

    #[test]
    fn writer_is_invisible_until_finish() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("00001.json");
        let mut writer = RoundFileWriter::create(final_path.clone(), false).unwrap();
        writer.write_line(&RawRecord::transport_error("https://a.com".into(), "x".into())).unwrap();
        assert!(!final_path.exists());
        writer.finish().unwrap();
        assert!(final_path.exists());
    }

    #[test]
    fn read_jsonl_roundtrips_parsed_documents() {
        let dir = tempdir().unwrap();
        let final_path = dir.path().join("00001.json");
        let mut writer = RoundFileWriter::create(final_path.clone(), false).unwrap();
        let doc = ParsedDocument {
            url: "https://a.com".into(),
            segments: vec![Segment { text: "hello world, this is long enough to matter.".into(), language_tag: "eng_Latn".into() }],
            parsed_urls: vec!["https://a.com/b".into()],
        };
        writer.write_line(&doc).unwrap();
        writer.finish().unwrap();

        let docs: Vec<ParsedDocument> = read_jsonl::<ParsedDocument>(&final_path)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(docs, vec![doc]);
    }
}
