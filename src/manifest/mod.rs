//! the manifest text protocol: one header block, then one line per entry

mod format;
mod reader;
mod writer;

pub use format::{encode_record, parse_record, write_header, GENERATOR_TAG};
pub use reader::{read_header, ManifestReader};
pub use writer::{create_output, ManifestWriter, RecordSink, DEFAULT_OUTPUT_STEM};
