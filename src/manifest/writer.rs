use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::manifest::format::{encode_record, write_header};
use crate::types::{ManifestRecord, RunHeader};

/// default manifest name when no output path is given
pub const DEFAULT_OUTPUT_STEM: &str = "auditcp";

/// receives each completed record, in traversal order
pub trait RecordSink {
    fn accept(&mut self, record: &ManifestRecord) -> Result<()>;
}

/// collecting sink, handy for callers that post-process records
impl RecordSink for Vec<ManifestRecord> {
    fn accept(&mut self, record: &ManifestRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// append-only manifest writer
///
/// every record goes out as one `write_all` followed by a flush, so an
/// interrupted run leaves at most one incomplete trailing line.
pub struct ManifestWriter<W: Write> {
    inner: W,
    path: PathBuf,
}

impl<W: Write> ManifestWriter<W> {
    /// `path` only names the target in errors
    pub fn new(inner: W, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
        }
    }

    pub fn write_header(&mut self, header: &RunHeader) -> Result<()> {
        let mut block = Vec::new();
        write_header(&mut block, header).with_path(&self.path)?;
        self.inner.write_all(&block).with_path(&self.path)?;
        self.inner.flush().with_path(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> RecordSink for ManifestWriter<W> {
    fn accept(&mut self, record: &ManifestRecord) -> Result<()> {
        let mut line = encode_record(record);
        line.push('\n');
        self.inner.write_all(line.as_bytes()).with_path(&self.path)?;
        self.inner.flush().with_path(&self.path)
    }
}

/// open the manifest output file
///
/// an explicit path is created or truncated. without one, `auditcp.out` is
/// created in the current directory, or the first free `auditcp(N).out`.
pub fn create_output(requested: Option<&Path>) -> Result<(File, PathBuf)> {
    if let Some(path) = requested {
        let file = File::create(path).with_path(path)?;
        return Ok((file, path.to_path_buf()));
    }
    create_numbered(Path::new("."))
}

fn create_numbered(dir: &Path) -> Result<(File, PathBuf)> {
    let mut n = 0usize;
    loop {
        let name = if n == 0 {
            format!("{}.out", DEFAULT_OUTPUT_STEM)
        } else {
            format!("{}({}).out", DEFAULT_OUTPUT_STEM, n)
        };
        let path = if dir == Path::new(".") {
            PathBuf::from(&name)
        } else {
            dir.join(&name)
        };

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e).with_path(path),
        }
    }
}
