use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Ownership;
use crate::hash::DigestSet;

/// kind of a traversed entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    /// manifest token
    pub fn name(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
            EntryKind::Symlink => "link",
            EntryKind::Other => "other",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "file" => Some(EntryKind::File),
            "dir" => Some(EntryKind::Directory),
            "link" => Some(EntryKind::Symlink),
            "other" => Some(EntryKind::Other),
            _ => None,
        }
    }

    /// whether entries of this kind carry a content digest
    pub fn has_content(self) -> bool {
        matches!(self, EntryKind::File | EntryKind::Symlink)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// terminal state of an entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Copied,
    Skipped,
    Failed,
}

impl Outcome {
    pub fn name(self) -> &'static str {
        match self {
            Outcome::Copied => "copied",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "copied" => Some(Outcome::Copied),
            "skipped" => Some(Outcome::Skipped),
            "failed" => Some(Outcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// one line of a manifest: what happened to a single entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestRecord {
    pub outcome: Outcome,
    pub kind: EntryKind,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub digests: DigestSet,
    /// ownership actually applied, absent when none was
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// error for failed entries, warning for otherwise successful ones
    pub detail: Option<String>,
}

impl ManifestRecord {
    pub fn new(
        outcome: Outcome,
        kind: EntryKind,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            outcome,
            kind,
            source: source.into(),
            destination: destination.into(),
            digests: DigestSet::default(),
            uid: None,
            gid: None,
            detail: None,
        }
    }

    pub fn with_digests(mut self, digests: DigestSet) -> Self {
        self.digests = digests;
        self
    }

    pub fn with_owner(mut self, owner: Ownership) -> Self {
        self.uid = Some(owner.uid);
        self.gid = Some(owner.gid);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// the recorded destination, anchored at `base` when relative
    pub fn destination_from(&self, base: Option<&Path>) -> PathBuf {
        match base {
            Some(base) if self.destination.is_relative() => base.join(&self.destination),
            _ => self.destination.clone(),
        }
    }
}
