// ABOUTME: Target specification for SSH and FTP transports.
// ABOUTME: Parses formats like "host", "host:port", "[::1]:22/path", "ftp://host/dir".

use crate::error::{Error, Result};

const SCHEMES: [&str; 4] = ["ssh://", "scp://", "sftp://", "ftp://"];

/// Where artifacts go, parsed once from the raw target parameter.
///
/// `remote_base_path` is everything after the first `/` following the host,
/// so `host/www` is relative to the login directory and `host//var/www` is
/// absolute. An empty path means the login directory itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub host: String,
    pub port: Option<u16>,
    pub remote_base_path: String,
    pub raw: String,
}

impl TargetSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_target(raw, "target cannot be empty"));
        }

        let without_scheme = SCHEMES
            .iter()
            .find_map(|scheme| {
                trimmed
                    .get(..scheme.len())
                    .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
                    .map(|_| &trimmed[scheme.len()..])
            })
            .unwrap_or(trimmed);

        let (authority, path) = match without_scheme.find('/') {
            Some(slash) => (&without_scheme[..slash], &without_scheme[slash + 1..]),
            None => (without_scheme, ""),
        };

        let (host, port) = split_host_port(authority).map_err(|reason| Error::invalid_target(raw, reason))?;

        if host.is_empty() {
            return Err(Error::invalid_target(raw, "hostname cannot be empty"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            remote_base_path: path.to_string(),
            raw: raw.to_string(),
        })
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

fn split_host_port(authority: &str) -> std::result::Result<(&str, Option<u16>), String> {
    if let Some(rest) = authority.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        let host = &rest[..close];
        let after = &rest[close + 1..];
        return match after.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if after.is_empty() => Ok((host, None)),
            None => Err(format!("unexpected characters after IPv6 literal: {after}")),
        };
    }

    // A bare IPv6 literal has several colons and no port.
    if authority.matches(':').count() > 1 {
        return Ok((authority, None));
    }

    match authority.split_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port)?))),
        None => Ok((authority, None)),
    }
}

fn parse_port(port: &str) -> std::result::Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("invalid port: {port}"))
}
