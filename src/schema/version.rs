// src/schema/version.rs

use std::{cmp::Ordering, fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::Error;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)(?:-([0-9A-Za-z][0-9A-Za-z.+-]*))?$")
        .expect("version pattern should compile")
});

/// A decomposed `MAJOR.MINOR.BUILD[-RELEASE]` schema version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SchemaVersion {
    pub major: u64,
    pub minor: u64,
    pub build: u64,
    pub release: Option<String>,
}

impl SchemaVersion {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        raw.parse()
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = VERSION_RE
            .captures(s)
            .ok_or_else(|| Error::Version(s.to_string()))?;
        let num = |i: usize| -> Result<u64, Error> {
            caps[i].parse().map_err(|_| Error::Version(s.to_string()))
        };
        Ok(SchemaVersion {
            major: num(1)?,
            minor: num(2)?,
            build: num(3)?,
            release: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)?;
        if let Some(r) = &self.release {
            write!(f, "-{}", r)?;
        }
        Ok(())
    }
}

// A pre-release sorts before the plain release with the same numbers.
impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.build)
            .cmp(&(other.major, other.minor, other.build))
            .then_with(|| match (&self.release, &other.release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
