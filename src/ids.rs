//! # Identifier Generation
//!
//! Record and table ids are drawn from an auto-generation pattern of the form
//! `[<charset>]{<length>}`, e.g. `[a-z0-9]{15}`. Ranges (`a-z`) and literal
//! characters are allowed inside the brackets.

use std::sync::OnceLock;

use rand::seq::SliceRandom;
use regex::Regex;

use crate::schema::{SchemaError, SchemaResult};

/// Pattern used by every `id` system field
pub const DEFAULT_ID_PATTERN: &str = "[a-z0-9]{15}";

/// Prefix for generated table ids
pub const TABLE_ID_PREFIX: &str = "tbl_";

const MAX_ID_LENGTH: usize = 255;

fn pattern_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([^\]]+)\]\{(\d+)\}$").expect("static pattern"))
}

/// A parsed auto-generation pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPattern {
    charset: Vec<char>,
    length: usize,
}

impl IdPattern {
    /// Parse a `[<charset>]{<length>}` pattern
    pub fn parse(pattern: &str) -> SchemaResult<Self> {
        let caps = pattern_regex().captures(pattern).ok_or_else(|| {
            SchemaError::validation(format!(
                "autogenerate pattern '{}' must look like [a-z0-9]{{15}}",
                pattern
            ))
        })?;

        let length: usize = caps[2].parse().map_err(|_| {
            SchemaError::validation(format!("invalid length in pattern '{}'", pattern))
        })?;
        if length == 0 || length > MAX_ID_LENGTH {
            return Err(SchemaError::validation(format!(
                "pattern length must be between 1 and {}",
                MAX_ID_LENGTH
            )));
        }

        let charset = expand_charset(&caps[1])?;
        Ok(Self { charset, length })
    }

    /// Generate a fresh identifier
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .filter_map(|_| self.charset.choose(&mut rng))
            .collect()
    }

    /// Whether a caller-supplied identifier could have come from this pattern
    pub fn matches(&self, candidate: &str) -> bool {
        candidate.chars().count() == self.length
            && candidate.chars().all(|c| self.charset.contains(&c))
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

fn expand_charset(spec: &str) -> SchemaResult<Vec<char>> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if i + 2 < chars.len() && chars[i + 1] == '-' {
            let (start, end) = (chars[i], chars[i + 2]);
            if start > end {
                return Err(SchemaError::validation(format!(
                    "invalid range '{}-{}' in pattern",
                    start, end
                )));
            }
            out.extend(start..=end);
            i += 3;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Generate a record id with the default pattern
pub fn generate_record_id() -> String {
    default_pattern().generate()
}

/// Generate a table id (`tbl_` + default pattern)
pub fn generate_table_id() -> String {
    format!("{}{}", TABLE_ID_PREFIX, default_pattern().generate())
}

fn default_pattern() -> &'static IdPattern {
    static PATTERN: OnceLock<IdPattern> = OnceLock::new();
    PATTERN.get_or_init(|| IdPattern::parse(DEFAULT_ID_PATTERN).expect("default id pattern"))
}
