//! auditcp - audited, resumable bulk copy
//!
//! copies a set of source paths into a destination tree while computing one or
//! more content digests per file in a single streaming pass, and writes a
//! replayable manifest of everything it did. manifests from earlier runs can be
//! fed back in as a content index, so unchanged content is skipped by digest
//! instead of being copied again.
//!
//! # Core concepts
//!
//! - **DigestPipeline**: feeds each chunk of a file to every requested hash at once
//! - **Manifest**: a header block describing the run, then one record line per entry
//! - **ContentIndex**: digest -> last known record, built from prior manifests
//! - **CopyEngine**: traversal, copy-or-skip decision, verification and ownership
//!
//! # Example usage
//!
//! ```no_run
//! use auditcp::{CopyEngine, CopyOptions, ManifestWriter, RunHeader};
//! use std::fs::File;
//! use std::path::{Path, PathBuf};
//!
//! let options = CopyOptions::default();
//! let sources = vec![PathBuf::from("/source")];
//! let header = RunHeader::capture(
//!     vec!["auditcp".into()],
//!     options.algorithms,
//!     sources.clone(),
//!     "/destination".into(),
//!     "run.out".into(),
//! );
//!
//! let mut writer = ManifestWriter::new(File::create("run.out").unwrap(), "run.out");
//! writer.write_header(&header).unwrap();
//!
//! let engine = CopyEngine::new(options, None).unwrap();
//! let summary = engine.run(&sources, Path::new("/destination"), &mut writer).unwrap();
//! assert!(summary.is_success());
//! ```

pub mod config;
mod error;
pub mod fs;
pub mod hash;
pub mod index;
pub mod manifest;
pub mod ops;
pub mod types;

pub use config::{parse_cache_size, Ownership};
pub use error::{Error, ErrorKind, IoResultExt, Result};
pub use hash::{Algorithm, AlgorithmMask, DigestPipeline, DigestSet, DigestValue};
pub use index::{peek_algorithms, ContentIndex};
pub use manifest::{create_output, ManifestReader, ManifestWriter, RecordSink};
pub use ops::{CopyEngine, CopyOptions, RunSummary};
pub use types::{EntryKind, ManifestRecord, Outcome, RunHeader};
