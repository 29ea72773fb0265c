//! Host documents and the enumeration step that produces them.
//!
//! A host document is one captured configuration export. Its identifier is
//! the SHA-256 of its raw bytes, so two copies of the same capture collapse
//! into one document and every (check, host) pair stays unique.

use ignore::WalkBuilder;
use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::classify::{classify, Classification};
use crate::errors::{ScanError, ScanResult};
use crate::filters::should_include_file;
use crate::metrics::ScanMetrics;

/// Files at or above this size are memory-mapped instead of read
pub(crate) const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// How invalid UTF-8 in a capture is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Invalid UTF-8 is an error for every unit that touches the document
    #[default]
    FailFast,
    /// Invalid sequences are replaced with U+FFFD
    Lossy,
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingMode::FailFast => f.write_str("failfast"),
            EncodingMode::Lossy => f.write_str("lossy"),
        }
    }
}

impl FromStr for EncodingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "failfast" | "fail-fast" => Ok(EncodingMode::FailFast),
            "lossy" => Ok(EncodingMode::Lossy),
            other => Err(format!(
                "unknown encoding mode '{}' (expected failfast or lossy)",
                other
            )),
        }
    }
}

/// Raw capture content, owned or backed by a live memory map
#[derive(Clone)]
pub enum CaptureBytes {
    Owned(Arc<[u8]>),
    Mapped(Arc<Mmap>),
}

impl CaptureBytes {
    pub fn is_mapped(&self) -> bool {
        matches!(self, CaptureBytes::Mapped(_))
    }
}

impl Deref for CaptureBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            CaptureBytes::Owned(bytes) => bytes,
            CaptureBytes::Mapped(map) => map,
        }
    }
}

impl AsRef<[u8]> for CaptureBytes {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for CaptureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBytes")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl From<Vec<u8>> for CaptureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        CaptureBytes::Owned(Arc::from(bytes))
    }
}

impl From<Arc<[u8]>> for CaptureBytes {
    fn from(bytes: Arc<[u8]>) -> Self {
        CaptureBytes::Owned(bytes)
    }
}

impl From<Mmap> for CaptureBytes {
    fn from(map: Mmap) -> Self {
        CaptureBytes::Mapped(Arc::new(map))
    }
}

/// One captured configuration export, classified
#[derive(Debug, Clone)]
pub struct HostDocument {
    /// Lower-case hex SHA-256 of `bytes`
    pub id: String,
    pub path: PathBuf,
    /// File name used in labels and reports
    pub name: String,
    pub bytes: CaptureBytes,
    pub encoding: EncodingMode,
    pub classification: Classification,
}

impl HostDocument {
    /// Builds a document from raw bytes, hashing and classifying it
    pub fn from_bytes(
        path: impl Into<PathBuf>,
        bytes: impl Into<CaptureBytes>,
        encoding: EncodingMode,
    ) -> Self {
        let path = path.into();
        let bytes = bytes.into();
        let mut doc = Self {
            id: content_hash(&bytes),
            name: display_name(&path),
            path,
            bytes,
            encoding,
            classification: Classification::unknown(),
        };
        doc.classification = doc.classify();
        doc
    }

    /// Reassembles a document whose identity and classification are already known
    pub fn from_parts(
        id: String,
        path: PathBuf,
        name: String,
        bytes: impl Into<CaptureBytes>,
        encoding: EncodingMode,
        classification: Classification,
    ) -> Self {
        Self {
            id,
            path,
            name,
            bytes: bytes.into(),
            encoding,
            classification,
        }
    }

    /// Decodes the document according to its encoding mode
    pub fn text(&self) -> ScanResult<Cow<'_, str>> {
        match self.encoding {
            EncodingMode::FailFast => std::str::from_utf8(&self.bytes)
                .map(Cow::Borrowed)
                .map_err(|e| ScanError::encoding_error(&self.path, e)),
            EncodingMode::Lossy => {
                let text = String::from_utf8_lossy(&self.bytes);
                if let Cow::Owned(_) = text {
                    warn!("Invalid UTF-8 replaced in host: {}", self.path.display());
                }
                Ok(text)
            }
        }
    }

    /// Runs the classifier over this document.
    ///
    /// Classification never fails, so undecodable bytes are looked at lossily
    /// here regardless of the encoding mode.
    pub fn classify(&self) -> Classification {
        let text = String::from_utf8_lossy(&self.bytes);
        classify(&self.name, &text)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Lower-case hex SHA-256 of `bytes`
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Options for [`enumerate_and_classify`]
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    pub encoding: EncodingMode,
    /// Glob patterns for files to skip
    pub ignore_patterns: Vec<String>,
    /// Extensions to accept; `None` accepts every text file
    pub file_extensions: Option<Vec<String>>,
}

fn read_capture(path: &Path, metrics: &ScanMetrics) -> ScanResult<CaptureBytes> {
    let len = std::fs::metadata(path)
        .map_err(|e| ScanError::from_io(path, e))?
        .len();

    if len >= MMAP_THRESHOLD {
        trace!("Memory-mapping large capture: {}", path.display());
        let file = File::open(path).map_err(|e| ScanError::from_io(path, e))?;
        // SAFETY: the map lives as long as the document; captures are not
        // expected to change while a scan runs.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ScanError::from_io(path, e))?;
        metrics.record_document(len, true);
        return Ok(CaptureBytes::from(mmap));
    }

    let bytes = std::fs::read(path).map_err(|e| ScanError::from_io(path, e))?;
    metrics.record_document(bytes.len() as u64, false);
    Ok(CaptureBytes::from(bytes))
}

fn collect_paths(inputs: &[PathBuf], options: &HostOptions) -> ScanResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.exists() {
            return Err(ScanError::file_not_found(input));
        }
        if input.is_file() {
            // Explicitly named files bypass the extension filter
            files.push(input.clone());
            continue;
        }

        let walker = WalkBuilder::new(input)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .build();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", input.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            if should_include_file(path, &options.file_extensions, &options.ignore_patterns) {
                files.push(path.to_path_buf());
            } else {
                trace!("Filtered out: {}", path.display());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Walks `inputs`, reads every capture and classifies it.
///
/// Inputs may be files or directories. A missing input is an error; a file
/// that cannot be read is logged and skipped. Documents are returned sorted
/// by path, with byte-identical captures collapsed into the first one seen.
pub fn enumerate_and_classify(
    inputs: &[PathBuf],
    options: &HostOptions,
) -> ScanResult<Vec<HostDocument>> {
    let metrics = ScanMetrics::new();
    let paths = collect_paths(inputs, options)?;
    info!("Enumerated {} capture files", paths.len());

    let mut documents: Vec<HostDocument> = paths
        .par_iter()
        .filter_map(|path| match read_capture(path, &metrics) {
            Ok(bytes) => Some(HostDocument::from_bytes(path.clone(), bytes, options.encoding)),
            Err(e) => {
                warn!("Skipping capture {}: {}", path.display(), e);
                None
            }
        })
        .collect();
    documents.sort_by(|a, b| a.path.cmp(&b.path));

    let mut seen = HashSet::new();
    documents.retain(|doc| {
        if seen.insert(doc.id.clone()) {
            true
        } else {
            warn!(
                "Skipping {}: identical content already enumerated (id {})",
                doc.path.display(),
                doc.id
            );
            false
        }
    });

    for doc in &documents {
        debug!("{} classified as {}", doc.name, doc.classification);
    }
    metrics.log_document_stats();
    Ok(documents)
}
