//! Backup name parsing and generation ordering.
//!
//! A backup entry is named `<prefix>.<generation>[<suffix>]`, where the
//! generation is either a sequential number (`blobstorage.0`) or a UTC
//! timestamp (`blobstorage.2017-01-02-03-04-05`), and the optional suffix
//! marks an archive (`.tar`, `.tar.gz`, `.delta.tar`, `.delta.tar.gz`) or a
//! tar snapshot-state file (`.snar`).

use chrono::{DateTime, NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::time::SystemTime;

/// Archive suffixes, longest first so that `.delta.tar` is never
/// mistaken for a bare `.tar`.
pub const ARCHIVE_SUFFIXES: [&str; 5] = [".delta.tar.gz", ".delta.tar", ".tar.gz", ".tar", ".snar"];

/// Timestamp format used in backup names: fixed-width, zero-padded UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// One backup generation: a sequential number or a UTC timestamp.
///
/// Ordering is "more recent is greater". All timestamps outrank all
/// numbers (the numbered scheme predates the timestamped one, so any
/// timestamped backup is newer than any numbered one). Within numbers,
/// `0` is the most recent; within timestamps, plain lexicographic order
/// works because the format is fixed-width and zero-padded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Generation {
    Number(u64),
    Timestamp(String),
}

impl Generation {
    /// Parse an identifier string: a bare integer or a full timestamp.
    pub fn parse(value: &str) -> Option<Self> {
        if is_timestamp(value) {
            return Some(Generation::Timestamp(value.to_string()));
        }
        value.parse::<u64>().ok().map(Generation::Number)
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, Generation::Timestamp(_))
    }

    /// The timestamp string this generation sorts as, deriving one from
    /// the given modification time for numbered generations.
    pub fn normalized_timestamp(&self, modified: SystemTime) -> String {
        match self {
            Generation::Timestamp(ts) => ts.clone(),
            Generation::Number(_) => gen_timestamp(DateTime::<Utc>::from(modified)),
        }
    }

    /// The moment this generation stands for, if one can be derived:
    /// the parsed timestamp, or the modification time for numbers.
    pub fn moment(&self, modified: SystemTime) -> DateTime<Utc> {
        match self {
            Generation::Timestamp(ts) => parse_timestamp(ts)
                .unwrap_or_else(|| DateTime::<Utc>::from(modified)),
            Generation::Number(_) => DateTime::<Utc>::from(modified),
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Number(n) => write!(f, "{}", n),
            Generation::Timestamp(ts) => f.write_str(ts),
        }
    }
}

impl Ord for Generation {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Lower number = more recent.
            (Generation::Number(a), Generation::Number(b)) => b.cmp(a),
            (Generation::Timestamp(a), Generation::Timestamp(b)) => a.cmp(b),
            (Generation::Timestamp(_), Generation::Number(_)) => Ordering::Greater,
            (Generation::Number(_), Generation::Timestamp(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Generation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A backup name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub prefix: String,
    pub generation: Generation,
    /// The archive suffix that was stripped, if any.
    pub suffix: Option<&'static str>,
}

impl ParsedName {
    pub fn is_delta(&self) -> bool {
        matches!(self.suffix, Some(s) if s.starts_with(".delta."))
    }

    pub fn is_snapshot_state(&self) -> bool {
        self.suffix == Some(".snar")
    }
}

/// Parse a backup entry name.
///
/// With `with_suffixes`, a known archive suffix is stripped first (longest
/// candidate first). The remainder must be `<prefix>.<generation>`; the
/// split is on the last dot. When `prefix` is given, the name must start
/// with exactly that prefix followed by a dot. Returns `None` for names
/// that are not backup entries at all.
pub fn parse_backup_name(
    name: &str,
    prefix: Option<&str>,
    with_suffixes: bool,
) -> Option<ParsedName> {
    let (stem, suffix) = if with_suffixes {
        strip_archive_suffix(name)
    } else {
        (name, None)
    };

    let (found_prefix, value) = match prefix {
        Some(p) => {
            let rest = stem.strip_prefix(p)?.strip_prefix('.')?;
            (p, rest)
        }
        None => stem.rsplit_once('.')?,
    };
    if found_prefix.is_empty() {
        return None;
    }

    Generation::parse(value).map(|generation| ParsedName {
        prefix: found_prefix.to_string(),
        generation,
        suffix,
    })
}

/// Split a known archive suffix off a name, trying the longest first.
pub fn strip_archive_suffix(name: &str) -> (&str, Option<&'static str>) {
    for suffix in ARCHIVE_SUFFIXES {
        if let Some(stem) = name.strip_suffix(suffix) {
            return (stem, Some(suffix));
        }
    }
    (name, None)
}

/// Format a UTC time as a backup timestamp (`2017-01-02-03-04-05`).
pub fn gen_timestamp(now: DateTime<Utc>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a backup timestamp back into a UTC time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whether `value` matches the fixed-width timestamp pattern
/// `\d{4}(-\d{2}){5}`.
pub fn is_timestamp(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() != 19 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            4 | 7 | 10 | 13 | 16 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_digit() {
                    return false;
                }
            }
        }
    }
    true
}
