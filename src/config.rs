//! run configuration shared by the library and the command line front end

use nix::unistd::{getegid, geteuid, Group, User};
use tracing::warn;

use crate::error::{Error, Result};
use crate::hash::DEFAULT_CHUNK_SIZE;

/// environment variable naming the owner of copied data
pub const ENV_OWNER: &str = "AUDITCP_OWNER";
/// environment variable naming the group of copied data
pub const ENV_GROUP: &str = "AUDITCP_GROUP";
/// environment variable setting the read/write chunk size
pub const ENV_CACHE_SIZE: &str = "AUDITCP_CACHE_SIZE";

/// uid/gid applied to every created artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    /// effective identity of this process
    pub fn effective() -> Self {
        Self {
            uid: geteuid().as_raw(),
            gid: getegid().as_raw(),
        }
    }

    /// resolve optional user and group names, falling back to the effective identity
    pub fn resolve(owner: Option<&str>, group: Option<&str>) -> Self {
        let fallback = Self::effective();
        Self {
            uid: owner.map_or(fallback.uid, |name| resolve_uid(name, fallback.uid)),
            gid: group.map_or(fallback.gid, |name| resolve_gid(name, fallback.gid)),
        }
    }
}

impl Default for Ownership {
    fn default() -> Self {
        Self::effective()
    }
}

fn resolve_uid(name: &str, fallback: u32) -> u32 {
    match User::from_name(name) {
        Ok(Some(user)) => user.uid.as_raw(),
        Ok(None) => name.parse().unwrap_or_else(|_| {
            warn!("uid lookup for '{}' failed, defaulting to euid {}", name, fallback);
            fallback
        }),
        Err(e) => {
            warn!("uid lookup for '{}' failed ({}), defaulting to euid {}", name, e, fallback);
            fallback
        }
    }
}

fn resolve_gid(name: &str, fallback: u32) -> u32 {
    match Group::from_name(name) {
        Ok(Some(group)) => group.gid.as_raw(),
        Ok(None) => name.parse().unwrap_or_else(|_| {
            warn!("gid lookup for '{}' failed, defaulting to egid {}", name, fallback);
            fallback
        }),
        Err(e) => {
            warn!("gid lookup for '{}' failed ({}), defaulting to egid {}", name, e, fallback);
            fallback
        }
    }
}

/// parse a cache size such as `32768`, `64K`, `0x8000` or `1g`
pub fn parse_cache_size(value: Option<&str>) -> Result<usize> {
    let Some(raw) = value else {
        return Ok(DEFAULT_CHUNK_SIZE);
    };
    let s = raw.trim();

    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return Err(Error::Config(format!("invalid cache size: '{}'", raw)));
    }

    let base = usize::from_str_radix(&digits[..end], radix)
        .map_err(|_| Error::Config(format!("invalid cache size: '{}'", raw)))?;

    let multiplier: usize = match &digits[end..] {
        "" => 1,
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        _ => return Err(Error::Config(format!("invalid cache suffix: '{}'", raw))),
    };

    let size = base
        .checked_mul(multiplier)
        .ok_or_else(|| Error::Config(format!("cache size too large: '{}'", raw)))?;
    if size == 0 {
        return Err(Error::Config(format!("cache size must be positive: '{}'", raw)));
    }
    Ok(size)
}
