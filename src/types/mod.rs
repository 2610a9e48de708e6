mod header;
mod record;

pub use header::RunHeader;
pub use record::{EntryKind, ManifestRecord, Outcome};
