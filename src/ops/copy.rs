use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Ownership;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{
    create_directory, create_symlink, list_children, open_source, read_symlink_target,
    set_link_owner, set_mode, set_owner, SourceEntry, StagedFile,
};
use crate::hash::{Algorithm, AlgorithmMask, DigestPipeline, DigestSet, DEFAULT_CHUNK_SIZE};
use crate::index::ContentIndex;
use crate::manifest::RecordSink;
use crate::ops::prepare::{plan_destination, Placement};
use crate::types::{EntryKind, ManifestRecord, Outcome};

/// copy options
#[derive(Clone, Debug)]
pub struct CopyOptions {
    /// digests computed for every entry
    pub algorithms: AlgorithmMask,
    /// read/write chunk size in bytes
    ///
    /// every worker and the driver thread own one buffer of this size, so
    /// buffers peak at `(jobs + 1) * chunk_size`.
    pub chunk_size: usize,
    /// applied to every created artifact
    pub owner: Ownership,
    /// echo each decision at info level
    pub verbose: bool,
    /// worker threads hashing and copying sibling files
    pub jobs: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            algorithms: AlgorithmMask::EMPTY.with(Algorithm::Md5),
            chunk_size: DEFAULT_CHUNK_SIZE,
            owner: Ownership::effective(),
            verbose: false,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// totals for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
    /// successful entries carrying a warning, such as a failed chown
    pub warnings: usize,
    pub bytes_copied: u64,
    /// cancellation stopped the run before every entry was admitted
    pub interrupted: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }

    pub fn entries(&self) -> usize {
        self.copied + self.skipped + self.failed
    }

    fn tally(&mut self, record: &ManifestRecord, bytes: u64) {
        match record.outcome {
            Outcome::Copied => {
                self.copied += 1;
                self.bytes_copied += bytes;
            }
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
        if record.outcome != Outcome::Failed && record.detail.is_some() {
            self.warnings += 1;
        }
    }
}

/// a finished entry plus the bytes it moved
type Finished = (ManifestRecord, u64);

/// where finished entries go; owned by the driver thread only
struct Emitter<'a> {
    sink: &'a mut dyn RecordSink,
    summary: RunSummary,
    verbose: bool,
}

impl Emitter<'_> {
    fn emit(&mut self, (record, bytes): Finished) -> Result<()> {
        self.summary.tally(&record, bytes);
        match (&record.outcome, &record.detail) {
            (Outcome::Failed, Some(detail)) => warn!("{}: {}", record.source.display(), detail),
            (_, Some(detail)) => warn!("{}: {}", record.destination.display(), detail),
            _ => {}
        }
        if self.verbose {
            info!(
                "{} {} {} -> {}",
                record.outcome,
                record.kind,
                record.source.display(),
                record.destination.display()
            );
        } else {
            debug!(
                "{} {} {} -> {}",
                record.outcome,
                record.kind,
                record.source.display(),
                record.destination.display()
            );
        }
        self.sink.accept(&record)
    }
}

/// drives traversal, decides copy or skip per entry, and reports every outcome
///
/// sibling files are hashed and copied on a worker pool; records still reach
/// the sink in traversal order because only the driver thread emits them.
pub struct CopyEngine {
    options: CopyOptions,
    index: Option<ContentIndex>,
    pool: rayon::ThreadPool,
    cancel: Option<Arc<AtomicBool>>,
}

impl CopyEngine {
    pub fn new(options: CopyOptions, index: Option<ContentIndex>) -> Result<Self> {
        if options.algorithms.is_empty() {
            return Err(Error::Config("no digest algorithm selected".into()));
        }
        if let Some(index) = &index {
            if !options.algorithms.contains(index.key_algorithm()) {
                return Err(Error::Config(format!(
                    "index is keyed by {} which is not among the selected digests ({})",
                    index.key_algorithm(),
                    options.algorithms
                )));
            }
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.jobs.max(1))
            .thread_name(|i| format!("auditcp-worker-{}", i))
            .build()?;

        Ok(Self {
            options,
            index,
            pool,
            cancel: None,
        })
    }

    /// stop admitting new entries once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    /// copy every source under `destination`, handing each record to `sink`
    ///
    /// entry failures are recorded and counted; an error is returned only
    /// when the destination cannot be prepared or the sink fails.
    pub fn run(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary> {
        let placements = plan_destination(sources, destination)?;
        self.run_placements(&placements, sink)
    }

    /// like [`CopyEngine::run`], for destinations already planned by the caller
    pub fn run_placements(
        &self,
        placements: &[Placement],
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary> {
        let mut out = Emitter {
            sink,
            summary: RunSummary::default(),
            verbose: self.options.verbose,
        };

        for placement in placements {
            if self.cancelled() {
                out.summary.interrupted = true;
                break;
            }
            self.visit(&placement.source, &placement.target, &mut out)?;
        }
        if self.cancelled() {
            out.summary.interrupted = true;
        }

        let summary = out.summary;
        info!(
            "{} copied, {} skipped, {} failed, {} warnings, {} bytes copied{}",
            summary.copied,
            summary.skipped,
            summary.failed,
            summary.warnings,
            summary.bytes_copied,
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn pipeline(&self) -> DigestPipeline {
        DigestPipeline::new(self.options.algorithms, self.options.chunk_size)
    }

    fn batch_limit(&self) -> usize {
        self.options.jobs.max(1) * 4
    }

    /// one top-level operand
    fn visit(&self, source: &Path, target: &Path, out: &mut Emitter<'_>) -> Result<()> {
        match SourceEntry::stat(source) {
            Ok(entry) if entry.kind == EntryKind::Directory => {
                self.visit_directory(&entry, target, out)
            }
            Ok(entry) => out.emit(self.process(&entry, target, &mut self.pipeline())),
            Err(e) => out.emit(failed(EntryKind::Other, source, target, &e)),
        }
    }

    /// create the directory, report it, then its children depth-first in name order
    fn visit_directory(&self, entry: &SourceEntry, target: &Path, out: &mut Emitter<'_>) -> Result<()> {
        let record = self.make_directory(entry, target);
        if record.outcome == Outcome::Failed {
            return out.emit((record, 0));
        }
        let children = match list_children(&entry.path) {
            Ok(children) => children,
            Err(e) => return out.emit(failed(EntryKind::Directory, &entry.path, target, &e)),
        };
        out.emit((record, 0))?;

        let mut batch: Vec<(SourceEntry, PathBuf)> = Vec::new();
        for child in children {
            if self.cancelled() {
                out.summary.interrupted = true;
                break;
            }
            let child_target = match child.file_name() {
                Some(name) => target.join(name),
                None => continue,
            };
            match SourceEntry::stat(&child) {
                Ok(child) if child.kind == EntryKind::Directory => {
                    self.flush(&mut batch, out)?;
                    self.visit_directory(&child, &child_target, out)?;
                }
                Ok(child) => {
                    batch.push((child, child_target));
                    if batch.len() >= self.batch_limit() {
                        self.flush(&mut batch, out)?;
                    }
                }
                Err(e) => {
                    self.flush(&mut batch, out)?;
                    out.emit(failed(EntryKind::Other, &child, &child_target, &e))?;
                }
            }
        }
        self.flush(&mut batch, out)
    }

    /// process queued sibling files in parallel, emitting in queue order
    fn flush(&self, batch: &mut Vec<(SourceEntry, PathBuf)>, out: &mut Emitter<'_>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let results: Vec<Option<Finished>> = self.pool.install(|| {
            batch
                .par_iter()
                .map_init(
                    || self.pipeline(),
                    |pipeline, (entry, target)| {
                        if self.cancelled() {
                            None
                        } else {
                            Some(self.process(entry, target, pipeline))
                        }
                    },
                )
                .collect()
        });
        batch.clear();

        for result in results {
            match result {
                Some(finished) => out.emit(finished)?,
                None => out.summary.interrupted = true,
            }
        }
        Ok(())
    }

    /// terminal outcome for one non-recursive entry
    fn process(&self, entry: &SourceEntry, target: &Path, pipeline: &mut DigestPipeline) -> Finished {
        let result = match entry.kind {
            EntryKind::File => self.transfer_file(entry, target, pipeline),
            EntryKind::Symlink => self.transfer_symlink(entry, target, pipeline),
            EntryKind::Directory => Ok((self.make_directory(entry, target), 0)),
            EntryKind::Other => Err(Error::Unsupported(entry.path.clone())),
        };
        result.unwrap_or_else(|e| failed(entry.kind, &entry.path, target, &e))
    }

    fn make_directory(&self, entry: &SourceEntry, target: &Path) -> ManifestRecord {
        match create_directory(target) {
            Ok(true) => {
                let record = ManifestRecord::new(
                    Outcome::Copied,
                    EntryKind::Directory,
                    &entry.path,
                    target,
                );
                self.owned(record, set_owner(target, self.options.owner))
            }
            Ok(false) => {
                ManifestRecord::new(Outcome::Skipped, EntryKind::Directory, &entry.path, target)
            }
            Err(e) => failed(EntryKind::Directory, &entry.path, target, &e).0,
        }
    }

    /// stream the source into a staging file next to `target`, hashing as it goes
    ///
    /// the source is read exactly once. an index hit found after the pass
    /// drops the staged copy instead of committing it.
    fn transfer_file(
        &self,
        entry: &SourceEntry,
        target: &Path,
        pipeline: &mut DigestPipeline,
    ) -> Result<Finished> {
        let source = open_source(&entry.path)?;
        let mut staged = StagedFile::create(target)?;
        let staging_path = staged.path().to_path_buf();
        let mut bytes = 0u64;
        let digests = pipeline.digest_with(source, &entry.path, |chunk| {
            bytes += chunk.len() as u64;
            staged.file_mut().write_all(chunk).with_path(&staging_path)
        })?;

        if let Some(index) = &self.index {
            if let Some(prior) = self.verified_hit(index, EntryKind::File, &digests, pipeline) {
                return Ok((skipped(entry, prior, digests), 0));
            }
        }

        staged.sync()?;
        verify_written(pipeline, &digests, staged.path(), target)?;

        let record = ManifestRecord::new(Outcome::Copied, EntryKind::File, &entry.path, target)
            .with_digests(digests);
        // chown before chmod, chown may clear setuid bits
        let record = self.owned(record, set_owner(staged.path(), self.options.owner));
        set_mode(staged.path(), entry.mode)?;
        staged.commit()?;

        Ok((record, bytes))
    }

    fn transfer_symlink(
        &self,
        entry: &SourceEntry,
        target: &Path,
        pipeline: &mut DigestPipeline,
    ) -> Result<Finished> {
        let link_target = read_symlink_target(&entry.path)?;
        let digests = pipeline.digest_bytes(link_target.as_os_str().as_bytes());

        if let Some(index) = &self.index {
            if let Some(prior) = self.verified_hit(index, EntryKind::Symlink, &digests, pipeline) {
                return Ok((skipped(entry, prior, digests), 0));
            }
        }

        create_symlink(target, &link_target)?;
        let record = ManifestRecord::new(Outcome::Copied, EntryKind::Symlink, &entry.path, target)
            .with_digests(digests);
        let record = self.owned(record, set_link_owner(target, self.options.owner));
        Ok((record, 0))
    }

    /// a prior record for `digests` whose destination still holds that content
    fn verified_hit<'i>(
        &self,
        index: &'i ContentIndex,
        kind: EntryKind,
        digests: &DigestSet,
        pipeline: &mut DigestPipeline,
    ) -> Option<&'i ManifestRecord> {
        let prior = index.lookup(digests.get(index.key_algorithm())?)?;
        if prior.kind != kind {
            debug!("index hit at {} is a {}, not a {}", prior.destination.display(), prior.kind, kind);
            return None;
        }
        if !prior.digests.matches(digests) {
            debug!("index hit at {} disagrees on another digest", prior.destination.display());
            return None;
        }

        let current = match SourceEntry::stat(&prior.destination) {
            Ok(found) if found.kind == kind => match kind {
                EntryKind::File => pipeline.digest_file(&prior.destination),
                EntryKind::Symlink => read_symlink_target(&prior.destination)
                    .map(|t| pipeline.digest_bytes(t.as_os_str().as_bytes())),
                _ => return None,
            },
            _ => {
                debug!("index hit at {} is gone", prior.destination.display());
                return None;
            }
        };
        match current {
            Ok(current) if current.matches(digests) => Some(prior),
            Ok(_) => {
                debug!("content at {} changed since it was recorded", prior.destination.display());
                None
            }
            Err(e) => {
                debug!("cannot re-verify {}: {}", prior.destination.display(), e);
                None
            }
        }
    }

    /// attach the applied ownership, or the chown failure as a warning
    fn owned(&self, record: ManifestRecord, chown: Result<()>) -> ManifestRecord {
        match chown {
            Ok(()) => record.with_owner(self.options.owner),
            Err(e) => record.with_detail(e.to_string()),
        }
    }
}

/// re-read the staged copy and hold it against what the source yielded
fn verify_written(
    pipeline: &mut DigestPipeline,
    expected: &DigestSet,
    written: &Path,
    target: &Path,
) -> Result<()> {
    let actual = pipeline.digest_file(written)?;
    match expected.mismatch(&actual) {
        Some(algorithm) => Err(Error::Verification {
            path: target.to_path_buf(),
            message: format!("{} of the written copy differs from the source", algorithm),
        }),
        None => Ok(()),
    }
}

fn skipped(entry: &SourceEntry, prior: &ManifestRecord, digests: DigestSet) -> ManifestRecord {
    let mut record = ManifestRecord::new(Outcome::Skipped, entry.kind, &entry.path, &prior.destination)
        .with_digests(digests);
    record.uid = prior.uid;
    record.gid = prior.gid;
    record
}

fn failed(kind: EntryKind, source: &Path, target: &Path, err: &Error) -> Finished {
    let record = ManifestRecord::new(Outcome::Failed, kind, source, target).with_detail(err.to_string());
    (record, 0)
}
