use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, IoResultExt, Result};

/// default chunk size for streaming reads
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// supported digest algorithms, in index-key priority order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
        Algorithm::Sha512,
    ];

    /// manifest name of the algorithm
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// digest length in bytes
    pub fn output_len(self) -> usize {
        match self {
            Algorithm::Md5 => 16,
            Algorithm::Sha1 => 20,
            Algorithm::Sha256 => 32,
            Algorithm::Sha512 => 64,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// set of digest algorithms requested for a run
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AlgorithmMask(u8);

impl AlgorithmMask {
    pub const EMPTY: AlgorithmMask = AlgorithmMask(0);
    pub const ALL: AlgorithmMask = AlgorithmMask(0b1111);

    pub fn with(self, algorithm: Algorithm) -> Self {
        Self(self.0 | algorithm.bit())
    }

    pub fn insert(&mut self, algorithm: Algorithm) {
        self.0 |= algorithm.bit();
    }

    pub fn contains(self, algorithm: Algorithm) -> bool {
        self.0 & algorithm.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersection(self, other: AlgorithmMask) -> Self {
        Self(self.0 & other.0)
    }

    /// algorithms in priority order
    pub fn iter(self) -> impl Iterator<Item = Algorithm> {
        Algorithm::ALL.into_iter().filter(move |a| self.contains(*a))
    }

    /// the lowest-ordinal algorithm present, used to key the content index
    pub fn index_key(self) -> Option<Algorithm> {
        self.iter().next()
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl FromIterator<Algorithm> for AlgorithmMask {
    fn from_iter<I: IntoIterator<Item = Algorithm>>(iter: I) -> Self {
        let mut mask = AlgorithmMask::EMPTY;
        for algorithm in iter {
            mask.insert(algorithm);
        }
        mask
    }
}

impl fmt::Display for AlgorithmMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(Algorithm::name).collect();
        f.write_str(&names.join(", "))
    }
}

impl fmt::Debug for AlgorithmMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlgorithmMask({})", self)
    }
}

/// raw digest bytes for one algorithm
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DigestValue(Vec<u8>);

impl DigestValue {
    /// parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidDigestHex(s.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for DigestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for DigestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "DigestValue({})", &hex[..hex.len().min(12)])
    }
}

/// digests of one byte stream, ordered by algorithm
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestSet {
    values: BTreeMap<Algorithm, DigestValue>,
}

impl DigestSet {
    pub fn get(&self, algorithm: Algorithm) -> Option<&DigestValue> {
        self.values.get(&algorithm)
    }

    pub fn algorithms(&self) -> AlgorithmMask {
        self.values.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, &DigestValue)> {
        self.values.iter().map(|(a, v)| (*a, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// true when every algorithm present in both sets agrees and at least one is shared
    pub fn matches(&self, other: &DigestSet) -> bool {
        let common = self.algorithms().intersection(other.algorithms());
        !common.is_empty() && self.mismatch(other).is_none()
    }

    /// first shared algorithm whose values differ
    pub fn mismatch(&self, other: &DigestSet) -> Option<Algorithm> {
        self.values
            .iter()
            .find(|(a, v)| other.get(**a).is_some_and(|o| o != *v))
            .map(|(a, _)| *a)
    }

    /// insert a value parsed from a manifest, checking its length
    pub(crate) fn insert_hex(&mut self, algorithm: Algorithm, hex: &str) -> Result<()> {
        let value = DigestValue::from_hex(hex)?;
        if value.as_bytes().len() != algorithm.output_len() {
            return Err(Error::InvalidDigestHex(hex.to_string()));
        }
        self.values.insert(algorithm, value);
        Ok(())
    }
}

/// one running hash state
enum Accumulator {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Accumulator {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Md5 => Accumulator::Md5(Md5::new()),
            Algorithm::Sha1 => Accumulator::Sha1(Sha1::new()),
            Algorithm::Sha256 => Accumulator::Sha256(Sha256::new()),
            Algorithm::Sha512 => Accumulator::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Accumulator::Md5(h) => h.update(data),
            Accumulator::Sha1(h) => h.update(data),
            Accumulator::Sha256(h) => h.update(data),
            Accumulator::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> (Algorithm, DigestValue) {
        match self {
            Accumulator::Md5(h) => (Algorithm::Md5, DigestValue(h.finalize().to_vec())),
            Accumulator::Sha1(h) => (Algorithm::Sha1, DigestValue(h.finalize().to_vec())),
            Accumulator::Sha256(h) => (Algorithm::Sha256, DigestValue(h.finalize().to_vec())),
            Accumulator::Sha512(h) => (Algorithm::Sha512, DigestValue(h.finalize().to_vec())),
        }
    }
}

/// all requested accumulators, fed in lockstep
struct MultiHasher {
    accumulators: Vec<Accumulator>,
}

impl MultiHasher {
    fn new(algorithms: AlgorithmMask) -> Self {
        Self {
            accumulators: algorithms.iter().map(Accumulator::new).collect(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        for acc in &mut self.accumulators {
            acc.update(data);
        }
    }

    fn finalize(self) -> DigestSet {
        DigestSet {
            values: self.accumulators.into_iter().map(Accumulator::finalize).collect(),
        }
    }
}

/// streaming digest computation over a reusable chunk buffer
///
/// each call reads its source exactly once, handing every chunk to all
/// requested accumulators before the next read. the buffer is owned by the
/// pipeline, so one pipeline serves one entry at a time.
pub struct DigestPipeline {
    algorithms: AlgorithmMask,
    buf: Vec<u8>,
}

impl DigestPipeline {
    pub fn new(algorithms: AlgorithmMask, chunk_size: usize) -> Self {
        Self {
            algorithms,
            buf: vec![0u8; chunk_size.max(1)],
        }
    }

    /// digest everything `reader` yields; `path` names the source in errors
    pub fn digest<R: Read>(&mut self, reader: R, path: &Path) -> Result<DigestSet> {
        self.digest_with(reader, path, |_| Ok(()))
    }

    /// digest `reader` while handing each chunk to `on_chunk`
    pub fn digest_with<R, F>(&mut self, mut reader: R, path: &Path, mut on_chunk: F) -> Result<DigestSet>
    where
        R: Read,
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut hasher = MultiHasher::new(self.algorithms);
        loop {
            let n = match reader.read(&mut self.buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_path(path),
            };
            let chunk = &self.buf[..n];
            hasher.update(chunk);
            on_chunk(chunk)?;
        }
        Ok(hasher.finalize())
    }

    pub fn digest_file(&mut self, path: &Path) -> Result<DigestSet> {
        let file = File::open(path).with_path(path)?;
        self.digest(file, path)
    }

    /// digest an in-memory value such as a symlink target
    pub fn digest_bytes(&self, bytes: &[u8]) -> DigestSet {
        let mut hasher = MultiHasher::new(self.algorithms);
        hasher.update(bytes);
        hasher.finalize()
    }
}
