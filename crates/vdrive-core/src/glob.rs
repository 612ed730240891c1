// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shell-style enumeration masks (`*`, `?`, `^` escapes the next character)

use crate::{FsError, FsResult};
use regex::{Regex, RegexBuilder};

/// Mask compiled once per enumeration request.
#[derive(Clone, Debug)]
pub struct Wildcard {
    mask: String,
    regex: Option<Regex>,
}

impl Wildcard {
    pub fn new(mask: &str, case_insensitive: bool) -> FsResult<Self> {
        if mask.is_empty() || mask == "*" || mask == "*.*" {
            return Ok(Self::any());
        }
        let regex = RegexBuilder::new(&to_regex(mask))
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|_| FsError::InvalidArgument)?;
        Ok(Self {
            mask: mask.to_string(),
            regex: Some(regex),
        })
    }

    pub fn any() -> Self {
        Self {
            mask: String::from("*"),
            regex: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.mask
    }

    pub fn is_match(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => true,
        }
    }
}

/// Anchored regex source for `mask`.
pub fn to_regex(mask: &str) -> String {
    let mut out = String::with_capacity(mask.len() * 2 + 2);
    out.push('^');
    let mut chars = mask.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '^' => {
                // Trailing escape matches a literal caret
                let literal = chars.next().unwrap_or('^');
                out.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}
