// ABOUTME: UNC target grammar for the SMB transport.
// ABOUTME: Validates `\\host\share[\...]` targets and splits them into host, share, and path.

use super::params::{PARAM_TARGET_URL, RunnerParams};
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// `\\host\share\...` where host is a hostname, IPv4, IPv6 (optionally bracketed)
/// or a `%variable%`; a variable host may stand alone.
static UNC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let variable = r"%[^%\\\s]+%";
    let host = r"(?:\[[0-9A-Fa-f:.]+\]|[0-9A-Fa-f]*:[0-9A-Fa-f:.]+|[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?)";
    let segment = r"[A-Za-z0-9.$\[\]&#%^~_+`'(){}!@=,;-]+";
    let pattern = format!(r"^\\\\(?:{variable}(?:\\{segment})*|{host}(?:\\{segment})+)\\?$");
    Regex::new(&pattern).expect("UNC pattern is valid")
});

/// A parameter that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidProperty {
    pub name: String,
    pub reason: String,
}

pub fn is_valid_unc(target: &str) -> bool {
    UNC_PATTERN.is_match(target)
}

/// Check SMB runner parameters, one report per offending parameter.
pub fn validate_properties(params: &RunnerParams) -> Vec<InvalidProperty> {
    let mut invalid = Vec::new();
    match params.get(PARAM_TARGET_URL) {
        None => invalid.push(InvalidProperty {
            name: PARAM_TARGET_URL.to_string(),
            reason: "Target should be set".to_string(),
        }),
        Some(target) if !is_valid_unc(target.trim()) => invalid.push(InvalidProperty {
            name: PARAM_TARGET_URL.to_string(),
            reason: "Invalid UNC path. Expected \\\\host\\share[\\subdir]".to_string(),
        }),
        Some(_) => {}
    }
    invalid
}

/// A resolved UNC target. Variables must already be substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncTarget {
    pub host: String,
    pub share: String,
    pub path: Vec<String>,
}

impl UncTarget {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !is_valid_unc(trimmed) {
            return Err(Error::invalid_target(
                raw,
                "expected \\\\host\\share[\\subdir]",
            ));
        }
        if trimmed.contains('%') {
            return Err(Error::invalid_target(raw, "unresolved %variable% reference"));
        }

        let mut parts = trimmed[2..].split('\\').filter(|part| !part.is_empty());
        let host = parts.next().unwrap_or_default();
        let share = parts
            .next()
            .ok_or_else(|| Error::invalid_target(raw, "share name is missing"))?;

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            share: share.to_string(),
            path: parts.map(str::to_string).collect(),
        })
    }
}
