// src/version/mod.rs

//! Loose version parsing and ordering
//!
//! Upstream projects do not follow strict semver: tags like `1.8.16`,
//! `0.7.10`, `4.16.1.2`, `2.0rc1` or even `CI` all appear in recipes.
//! A [`LooseVersion`] splits the string into numeric and alphabetic
//! segments and orders them segment by segment:
//!
//! - numeric segments compare numerically (`10 > 9`)
//! - a numeric segment sorts after an alphabetic one (`1.0 > 1.rc`)
//! - alphabetic segments compare lexicographically
//! - a `~` starts a pre-release and sorts before anything (`1.0~rc1 < 1.0`)
//! - otherwise the version with more segments is newer (`1.0.1 > 1.0`)

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One comparable piece of a version string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Numeric(u64),
    Alpha(String),
    /// Pre-release marker (`~`)
    Tilde,
}

impl Segment {
    fn cmp_segment(&self, other: &Segment) -> Ordering {
        match (self, other) {
            (Segment::Tilde, Segment::Tilde) => Ordering::Equal,
            (Segment::Tilde, _) => Ordering::Less,
            (_, Segment::Tilde) => Ordering::Greater,
            (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
            (Segment::Numeric(_), Segment::Alpha(_)) => Ordering::Greater,
            (Segment::Alpha(_), Segment::Numeric(_)) => Ordering::Less,
            (Segment::Alpha(a), Segment::Alpha(b)) => a.cmp(b),
        }
    }
}

/// A version with arbitrary numeric/alphabetic segments
#[derive(Debug, Clone)]
pub struct LooseVersion {
    original: String,
    segments: Vec<Segment>,
}

impl LooseVersion {
    /// Parse a version string
    ///
    /// Any character other than ASCII alphanumerics and `~` acts as a
    /// separator. A leading `v` before a digit (`v1.2`) is ignored.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = match trimmed.strip_prefix(['v', 'V']) {
            Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
            _ => trimmed,
        };

        let mut segments = Vec::new();
        let mut chars = body.chars().peekable();

        while let Some(&c) = chars.peek() {
            if c == '~' {
                segments.push(Segment::Tilde);
                chars.next();
            } else if c.is_ascii_digit() {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let value = digits.parse::<u64>().map_err(|e| {
                    Error::ParseError(format!("Version segment '{}' in '{}': {}", digits, s, e))
                })?;
                segments.push(Segment::Numeric(value));
            } else if c.is_ascii_alphabetic() {
                let mut alpha = String::new();
                while let Some(&a) = chars.peek() {
                    if !a.is_ascii_alphabetic() {
                        break;
                    }
                    alpha.push(a);
                    chars.next();
                }
                segments.push(Segment::Alpha(alpha));
            } else {
                chars.next();
            }
        }

        if segments.is_empty() {
            return Err(Error::ParseError(format!("Empty version string '{}'", s)));
        }

        Ok(Self {
            original: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The first `n` segments rendered without separators
    ///
    /// Used to name ABI-compatible families: `1.8.16` with `n = 1` gives `1`,
    /// with `n = 2` gives `1.8`.
    pub fn prefix(&self, n: usize) -> String {
        self.segments
            .iter()
            .take(n)
            .map(|s| match s {
                Segment::Numeric(v) => v.to_string(),
                Segment::Alpha(a) => a.clone(),
                Segment::Tilde => "~".to_string(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Whether the two versions share the first `n` segments
    pub fn same_family(&self, other: &LooseVersion, n: usize) -> bool {
        if n == 0 {
            return true;
        }
        if self.segments.len() < n || other.segments.len() < n {
            return false;
        }
        self.segments[..n] == other.segments[..n]
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.segments.iter();
        let mut right = other.segments.iter();

        loop {
            match (left.next(), right.next()) {
                (Some(a), Some(b)) => match a.cmp_segment(b) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
                (None, None) => return Ordering::Equal,
                // A trailing pre-release marker makes the longer version older
                (Some(Segment::Tilde), None) => return Ordering::Less,
                (None, Some(Segment::Tilde)) => return Ordering::Greater,
                (Some(_), None) => return Ordering::Greater,
                (None, Some(_)) => return Ordering::Less,
            }
        }
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for LooseVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for LooseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for LooseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        LooseVersion::parse(&s).map_err(serde::de::Error::custom)
    }
}
