use std::path::PathBuf;

use tracing::warn;

use crate::hash::AlgorithmMask;

/// metadata describing one run, written once at the top of its manifest
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunHeader {
    pub version: String,
    pub timestamp: String,
    /// full command line, argv[0] included
    pub command: Vec<String>,
    /// digest algorithms computed for every entry
    pub algorithms: AlgorithmMask,
    pub host: String,
    /// directory relative paths in this manifest are anchored at
    pub cwd: Option<PathBuf>,
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub output: PathBuf,
    /// owner and group names as requested, before resolution
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl RunHeader {
    /// describe the current process: timestamp, host and cwd are captured now
    pub fn capture(
        command: Vec<String>,
        algorithms: AlgorithmMask,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        output: PathBuf,
    ) -> Self {
        let cwd = match std::env::current_dir() {
            Ok(cwd) => Some(cwd),
            Err(e) => {
                warn!("cannot retrieve current working directory: {}", e);
                None
            }
        };

        let host = nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Local::now().to_rfc3339(),
            command,
            algorithms,
            host,
            cwd,
            sources,
            destination,
            output,
            owner: None,
            group: None,
        }
    }

    pub fn with_names(mut self, owner: Option<String>, group: Option<String>) -> Self {
        self.owner = owner;
        self.group = group;
        self
    }
}
