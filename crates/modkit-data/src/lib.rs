//! Modkit Data -- the filesystem side of mod loading.
//!
//! Discovers and parses JSON, RON and TOML data files, and provides the
//! [`Session`] that runs the two-phase reader pipeline over mod folders and
//! applies entity modification files.

pub mod config;
pub mod loader;
pub mod session;

pub use config::{ConfigError, LoaderConfig};
pub use loader::{DataLoadError, Format, detect_format, discover_data_files, parse_document};
pub use session::{FolderLoad, Host, PhaseSummary, PipelineError, Session};
