//! Data file access: format detection, file discovery, and parsing into
//! untyped [`Document`]s.
//!
//! JSON, RON and TOML files all parse into the same value tree, so readers
//! never care which format a mod author picked.

use modkit_core::document::Document;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while reading one data file or a resources folder.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// The file parsed, but its top level is not a key/value object.
    #[error("top level of {file} is not an object")]
    NotAnObject { file: PathBuf },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Ron,
    Toml,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Json, Format::Ron, Format::Toml];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(Format::Json),
            "ron" => Some(Format::Ron),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Ron => "ron",
            Format::Toml => "toml",
        }
    }
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(Format::from_extension)
        .ok_or_else(|| DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Every data file under `dir`, recursively, in any supported format.
pub fn discover_data_files(dir: &Path) -> Result<Vec<PathBuf>, DataLoadError> {
    let extensions: Vec<&str> = Format::ALL.iter().map(|f| f.extension()).collect();
    discover_with_extensions(dir, extensions.as_slice())
}

/// Every file under `dir`, recursively, whose extension is in `extensions`.
///
/// Symbolic links are not followed. The result is sorted by path so runs are
/// reproducible; loading must not depend on that order.
pub fn discover_with_extensions<S: AsRef<str>>(
    dir: &Path,
    extensions: &[S],
) -> Result<Vec<PathBuf>, DataLoadError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|allowed| allowed.as_ref() == ext));
        if matches {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

// ===========================================================================
// Parsing
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and parse it into an untyped value according to its format.
pub fn parse_value(path: &Path) -> Result<Value, DataLoadError> {
    let format = detect_format(path)?;
    let content = fs::read_to_string(path)?;

    match format {
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Read a file into a [`Document`]. The top level must be an object.
pub fn parse_document(path: &Path) -> Result<Document, DataLoadError> {
    Document::from_value(parse_value(path)?).map_err(|_| DataLoadError::NotAnObject {
        file: path.to_path_buf(),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
