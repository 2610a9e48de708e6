use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, IoResultExt, Result};
use crate::manifest::format::{is_record_line, parse_record, HeaderBuilder, GENERATOR_TAG};
use crate::types::{ManifestRecord, RunHeader};

/// streaming reader over a manifest: the header is parsed up front,
/// records are yielded one line at a time
pub struct ManifestReader<R> {
    reader: R,
    path: PathBuf,
    header: RunHeader,
    line_no: usize,
    /// first record line, consumed while looking for the end of the header
    pending: Option<String>,
    buf: Vec<u8>,
}

impl ManifestReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        Self::new(BufReader::new(file), path)
    }
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Result<Self> {
        let mut this = Self {
            reader,
            path: path.into(),
            header: RunHeader::default(),
            line_no: 0,
            pending: None,
            buf: Vec::new(),
        };

        match this.next_line()? {
            Some(line) if line == GENERATOR_TAG => {}
            Some(_) | None => return Err(this.parse_error("not an auditcp manifest")),
        }

        let mut builder = HeaderBuilder::new();
        while let Some(line) = this.next_line()? {
            if is_record_line(&line) {
                this.pending = Some(line);
                break;
            }
            if line.is_empty() {
                continue;
            }
            builder.push(&line).map_err(|m| this.parse_error(m))?;
        }
        this.header = builder.finish().map_err(|m| this.parse_error(m))?;
        Ok(this)
    }

    pub fn header(&self) -> &RunHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// number of the line most recently read
    pub fn line(&self) -> usize {
        self.line_no
    }

    /// next complete line; a final line without newline is an interrupted write and is dropped
    fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .with_path(&self.path)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if self.buf.last() != Some(&b'\n') {
            warn!(
                "{}: ignoring incomplete final line {}",
                self.path.display(),
                self.line_no
            );
            return Ok(None);
        }
        self.buf.pop();
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        let line = std::str::from_utf8(&self.buf)
            .map_err(|_| self.parse_error("line is not valid utf-8"))?;
        Ok(Some(line.to_string()))
    }

    fn parse_error(&self, message: impl Into<String>) -> Error {
        Error::ManifestParse {
            path: self.path.clone(),
            line: self.line_no,
            message: message.into(),
        }
    }

    fn next_record(&mut self) -> Result<Option<ManifestRecord>> {
        loop {
            let line = match self.pending.take() {
                Some(line) => line,
                None => match self.next_line()? {
                    Some(line) => line,
                    None => return Ok(None),
                },
            };
            if line.is_empty() {
                continue;
            }
            return parse_record(&line)
                .map(Some)
                .map_err(|m| self.parse_error(m));
        }
    }
}

impl<R: BufRead> Iterator for ManifestReader<R> {
    type Item = Result<ManifestRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// read only the header of a manifest
pub fn read_header(path: &Path) -> Result<RunHeader> {
    Ok(ManifestReader::open(path)?.header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Algorithm, AlgorithmMask, DigestPipeline};
    use crate::manifest::{ManifestWriter, RecordSink};
    use crate::types::{EntryKind, Outcome};
    use std::io::Cursor;

    fn header() -> RunHeader {
        RunHeader {
            version: "0.1.0".into(),
            timestamp: "now".into(),
            command: vec!["auditcp".into()],
            algorithms: AlgorithmMask::EMPTY.with(Algorithm::Sha256),
            host: "h".into(),
            cwd: None,
            sources: vec!["src".into()],
            destination: "dst".into(),
            output: "out".into(),
            owner: None,
            group: None,
        }
    }

    fn manifest(records: &[ManifestRecord]) -> Vec<u8> {
        let mut writer = ManifestWriter::new(Vec::new(), "mem");
        writer.write_header(&header()).unwrap();
        for record in records {
            writer.accept(record).unwrap();
        }
        writer.into_inner()
    }

    fn record(name: &str, content: &[u8]) -> ManifestRecord {
        let digests =
            DigestPipeline::new(AlgorithmMask::EMPTY.with(Algorithm::Sha256), 8).digest_bytes(content);
        ManifestRecord::new(
            Outcome::Copied,
            EntryKind::File,
            format!("src/{}", name),
            format!("dst/{}", name),
        )
        .with_digests(digests)
    }

    #[test]
    fn test_read_back_records() {
        let records = vec![record("a", b"a"), record("b", b"b")];
        let bytes = manifest(&records);

        let reader = ManifestReader::new(Cursor::new(bytes), "mem").unwrap();
        assert_eq!(reader.header(), &header());
        let parsed: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(parsed, records);
    }

    #[test]
    fn test_header_only_manifest() {
        let bytes = manifest(&[]);
        let reader = ManifestReader::new(Cursor::new(bytes), "mem").unwrap();
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn test_truncated_manifest_keeps_complete_lines() {
        let records = vec![record("a", b"a"), record("b", b"b")];
        let mut bytes = manifest(&records);
        // cut the last record in half
        let cut = bytes.len() - 20;
        bytes.truncate(cut);

        let reader = ManifestReader::new(Cursor::new(bytes), "mem").unwrap();
        let parsed: Vec<_> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(parsed, records[..1]);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let err = ManifestReader::new(Cursor::new(b"hello\nworld\n".to_vec()), "mem")
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_malformed_record_reports_line() {
        let mut bytes = manifest(&[record("a", b"a")]);
        bytes.extend_from_slice(b"copied file src=\"x\"\n");

        let results: Vec<_> = ManifestReader::new(Cursor::new(bytes), "mem")
            .unwrap()
            .collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(Error::ManifestParse { line, message, .. }) => {
                assert_eq!(*line, 11);
                assert!(message.contains("dst"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
