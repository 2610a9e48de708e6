//! lookup of previously transferred content, built from earlier manifests

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::{Algorithm, AlgorithmMask, DigestValue};
use crate::manifest::{read_header, ManifestReader};
use crate::types::{ManifestRecord, Outcome};

/// maps a digest under the run's key algorithm to the last record seen for it
///
/// read-only once built; shared by reference between hashing workers.
#[derive(Debug)]
pub struct ContentIndex {
    key: Algorithm,
    entries: HashMap<DigestValue, ManifestRecord>,
}

impl ContentIndex {
    pub fn new(key: Algorithm) -> Self {
        Self {
            key,
            entries: HashMap::new(),
        }
    }

    /// ingest every manifest in order; any malformed or incompatible input is fatal
    pub fn build(key: Algorithm, manifests: &[PathBuf]) -> Result<Self> {
        let mut index = Self::new(key);
        for path in manifests {
            let reader = ManifestReader::open(path)?;
            let count = index.ingest(reader)?;
            debug!("indexed {} records from {}", count, path.display());
        }
        debug!("content index holds {} digests keyed by {}", index.len(), key);
        Ok(index)
    }

    /// add the records of one manifest, later records replacing earlier ones
    pub fn ingest<R: BufRead>(&mut self, mut reader: ManifestReader<R>) -> Result<usize> {
        if !reader.header().algorithms.contains(self.key) {
            return Err(Error::MissingAlgorithm {
                path: reader.path().to_path_buf(),
                algorithm: self.key,
            });
        }
        let base = reader.header().cwd.clone();

        let mut count = 0;
        while let Some(record) = reader.next() {
            let mut record = record?;
            if record.outcome == Outcome::Failed || !record.kind.has_content() {
                continue;
            }
            let value = match record.digests.get(self.key) {
                Some(value) => value.clone(),
                None => {
                    return Err(Error::ManifestParse {
                        path: reader.path().to_path_buf(),
                        line: reader.line(),
                        message: format!("record has no {} digest", self.key),
                    })
                }
            };
            record.destination = record.destination_from(base.as_deref());
            self.entries.insert(value, record);
            count += 1;
        }
        Ok(count)
    }

    pub fn lookup(&self, value: &DigestValue) -> Option<&ManifestRecord> {
        self.entries.get(value)
    }

    pub fn key_algorithm(&self) -> Algorithm {
        self.key
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// algorithms declared by every one of `manifests`, read from headers only
pub fn peek_algorithms(manifests: &[PathBuf]) -> Result<AlgorithmMask> {
    let mut common = AlgorithmMask::ALL;
    for path in manifests {
        let header = read_header(path).map_err(|e| {
            Error::Config(format!(
                "cannot determine digest types from '{}': {}",
                path.display(),
                e
            ))
        })?;
        debug!("{} declares {}", path.display(), header.algorithms);
        common = common.intersection(header.algorithms);
    }
    if common.is_empty() {
        return Err(Error::NoCommonAlgorithm);
    }
    Ok(common)
}
