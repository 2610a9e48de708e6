//! line-level encoding of manifest headers and records
//!
//! header lines are `key: value`, with list values as JSON arrays of strings.
//! record lines are `<outcome> <kind> key=value...` where details are JSON
//! strings, digests are lowercase hex and ids are decimal.
//!
//! paths are JSON strings when they are valid UTF-8 and JSON arrays of their
//! raw bytes otherwise, so every path reads back exactly as it was written.

use std::ffi::OsString;
use std::io::{self, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::hash::{Algorithm, DigestSet};
use crate::types::{EntryKind, ManifestRecord, Outcome, RunHeader};

/// first line of every manifest
pub const GENERATOR_TAG: &str = "File Generated by auditcp DO NOT EDIT";

/// quote a string as JSON
fn quote(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

fn json_array<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Value::Array(items.into_iter().map(|s| Value::String(s.into())).collect()).to_string()
}

fn path_value(path: &Path) -> Value {
    match path.to_str() {
        Some(s) => Value::String(s.to_owned()),
        None => Value::Array(
            path.as_os_str()
                .as_bytes()
                .iter()
                .map(|b| Value::from(*b))
                .collect(),
        ),
    }
}

fn path_from_value(key: &str, value: Value) -> Result<PathBuf, String> {
    match value {
        Value::String(s) => Ok(PathBuf::from(s)),
        Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect();
            bytes
                .map(|bytes| PathBuf::from(OsString::from_vec(bytes)))
                .ok_or_else(|| format!("bad byte path for '{}'", key))
        }
        other => Err(format!("expected a path for '{}', got {}", key, other)),
    }
}

fn path_array<'p>(paths: impl IntoIterator<Item = &'p Path>) -> String {
    Value::Array(paths.into_iter().map(path_value).collect()).to_string()
}

fn put(out: &mut impl Write, key: &str, value: &str) -> io::Result<()> {
    writeln!(out, "{:<11}: {}", key, value)
}

/// write the header block
pub fn write_header(out: &mut impl Write, header: &RunHeader) -> io::Result<()> {
    writeln!(out, "{}", GENERATOR_TAG)?;
    put(out, "version", &header.version)?;
    put(out, "timestamp", &header.timestamp)?;
    put(out, "command", &json_array(header.command.iter().cloned()))?;
    put(out, "digests", &json_array(header.algorithms.iter().map(Algorithm::name)))?;
    put(out, "host", &header.host)?;
    if let Some(cwd) = &header.cwd {
        put(out, "cwd", &path_array([cwd.as_path()]))?;
    }
    put(out, "sources", &path_array(header.sources.iter().map(PathBuf::as_path)))?;
    put(out, "destination", &path_array([header.destination.as_path()]))?;
    put(out, "output", &path_array([header.output.as_path()]))?;
    if let Some(owner) = &header.owner {
        put(out, "data_owner", owner)?;
    }
    if let Some(group) = &header.group {
        put(out, "data_group", group)?;
    }
    Ok(())
}

/// whether a line starts a record rather than continuing the header
pub fn is_record_line(line: &str) -> bool {
    line.split_once(' ')
        .is_some_and(|(first, _)| Outcome::from_name(first).is_some())
}

/// accumulates header lines into a RunHeader
pub struct HeaderBuilder {
    header: Option<RunHeader>,
    saw_digests: bool,
    saw_destination: bool,
}

impl HeaderBuilder {
    pub fn new() -> Self {
        Self {
            header: Some(RunHeader::default()),
            saw_digests: false,
            saw_destination: false,
        }
    }

    /// consume one `key: value` line
    pub fn push(&mut self, line: &str) -> Result<(), String> {
        let header = self
            .header
            .as_mut()
            .ok_or_else(|| "header already finished".to_string())?;
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| format!("expected 'key: value', got '{}'", line))?;
        let key = key.trim();
        let value = value.strip_prefix(' ').unwrap_or(value);

        match key {
            "version" => header.version = value.to_string(),
            "timestamp" => header.timestamp = value.to_string(),
            "command" => header.command = parse_strings(key, value)?,
            "digests" => {
                let algorithms: Vec<Algorithm> = serde_json::from_str(value)
                    .map_err(|e| format!("bad digests list '{}': {}", value, e))?;
                header.algorithms = algorithms.into_iter().collect();
                self.saw_digests = true;
            }
            "host" => header.host = value.to_string(),
            "cwd" => header.cwd = Some(single_path(key, value)?),
            "sources" => header.sources = parse_paths(key, value)?,
            "destination" => {
                header.destination = single_path(key, value)?;
                self.saw_destination = true;
            }
            "output" => header.output = single_path(key, value)?,
            "data_owner" => header.owner = Some(value.to_string()),
            "data_group" => header.group = Some(value.to_string()),
            other => return Err(format!("unknown header key '{}'", other)),
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<RunHeader, String> {
        if !self.saw_digests {
            return Err("header does not declare digests".to_string());
        }
        if !self.saw_destination {
            return Err("header does not declare a destination".to_string());
        }
        self.header
            .take()
            .ok_or_else(|| "header already finished".to_string())
    }
}

impl Default for HeaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_strings(key: &str, value: &str) -> Result<Vec<String>, String> {
    serde_json::from_str(value).map_err(|e| format!("bad {} list '{}': {}", key, value, e))
}

fn parse_paths(key: &str, value: &str) -> Result<Vec<PathBuf>, String> {
    let items: Vec<Value> = serde_json::from_str(value)
        .map_err(|e| format!("bad {} list '{}': {}", key, value, e))?;
    items
        .into_iter()
        .map(|item| path_from_value(key, item))
        .collect()
}

fn single_path(key: &str, value: &str) -> Result<PathBuf, String> {
    let mut items = parse_paths(key, value)?;
    if items.len() != 1 {
        return Err(format!("{} must hold exactly one path", key));
    }
    Ok(items.remove(0))
}

/// encode a record as a single line, without the trailing newline
pub fn encode_record(record: &ManifestRecord) -> String {
    let mut line = format!(
        "{} {} src={} dst={}",
        record.outcome,
        record.kind,
        path_value(&record.source),
        path_value(&record.destination),
    );
    for (algorithm, value) in record.digests.iter() {
        line.push_str(&format!(" {}={}", algorithm, value));
    }
    if let Some(uid) = record.uid {
        line.push_str(&format!(" uid={}", uid));
    }
    if let Some(gid) = record.gid {
        line.push_str(&format!(" gid={}", gid));
    }
    if let Some(detail) = &record.detail {
        // keep the record on one line whatever the message holds
        line.push_str(&format!(" detail={}", quote(detail)));
    }
    line
}

/// parse one record line
pub fn parse_record(line: &str) -> Result<ManifestRecord, String> {
    let (outcome, rest) = line
        .split_once(' ')
        .ok_or_else(|| "record line too short".to_string())?;
    let outcome =
        Outcome::from_name(outcome).ok_or_else(|| format!("unknown outcome '{}'", outcome))?;
    let (kind, rest) = rest.split_once(' ').unwrap_or((rest, ""));
    let kind = EntryKind::from_name(kind).ok_or_else(|| format!("unknown entry kind '{}'", kind))?;

    let mut source = None;
    let mut destination = None;
    let mut digests = DigestSet::default();
    let mut uid = None;
    let mut gid = None;
    let mut detail = None;

    for (key, value) in parse_fields(rest)? {
        match key {
            "src" => set_once(&mut source, key, path_from_value(key, value)?)?,
            "dst" => set_once(&mut destination, key, path_from_value(key, value)?)?,
            "uid" => set_once(&mut uid, key, parse_id(key, &text(key, value)?)?)?,
            "gid" => set_once(&mut gid, key, parse_id(key, &text(key, value)?)?)?,
            "detail" => set_once(&mut detail, key, text(key, value)?)?,
            other => {
                let algorithm = Algorithm::from_name(other)
                    .ok_or_else(|| format!("unknown field '{}'", other))?;
                if digests.get(algorithm).is_some() {
                    return Err(format!("duplicate field '{}'", other));
                }
                let value = text(key, value)?;
                digests
                    .insert_hex(algorithm, &value)
                    .map_err(|_| format!("bad {} digest '{}'", algorithm, value))?;
            }
        }
    }

    Ok(ManifestRecord {
        outcome,
        kind,
        source: source.ok_or_else(|| "missing src".to_string())?,
        destination: destination.ok_or_else(|| "missing dst".to_string())?,
        digests,
        uid,
        gid,
        detail,
    })
}

fn set_once<T>(slot: &mut Option<T>, key: &str, value: T) -> Result<(), String> {
    if slot.is_some() {
        return Err(format!("duplicate field '{}'", key));
    }
    *slot = Some(value);
    Ok(())
}

fn text(key: &str, value: Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(format!("expected text for '{}', got {}", key, other)),
    }
}

fn parse_id(key: &str, value: &str) -> Result<u32, String> {
    value
        .parse()
        .map_err(|_| format!("bad {} '{}'", key, value))
}

/// split `key=value key="quoted value" key=[1,2]...` into pairs
///
/// bare values come back as JSON strings.
fn parse_fields(mut rest: &str) -> Result<Vec<(&str, Value)>, String> {
    let mut fields = Vec::new();
    rest = rest.trim_start_matches(' ');

    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| format!("expected key=value near '{}'", rest))?;
        let key = &rest[..eq];
        if key.is_empty() || key.contains(' ') {
            return Err(format!("bad field name near '{}'", rest));
        }
        rest = &rest[eq + 1..];

        let value = if rest.starts_with('"') || rest.starts_with('[') {
            let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
            let value = match stream.next() {
                Some(Ok(value)) => value,
                Some(Err(e)) => return Err(format!("bad quoted value for '{}': {}", key, e)),
                None => return Err(format!("missing value for '{}'", key)),
            };
            rest = &rest[stream.byte_offset()..];
            value
        } else {
            let end = rest.find(' ').unwrap_or(rest.len());
            let value = Value::String(rest[..end].to_string());
            rest = &rest[end..];
            value
        };

        if !rest.is_empty() && !rest.starts_with(' ') {
            return Err(format!("trailing garbage after '{}'", key));
        }
        rest = rest.trim_start_matches(' ');
        fields.push((key, value));
    }

    Ok(fields)
}
