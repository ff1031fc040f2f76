// ABOUTME: ssh_config style host blocks and per-host resolution.
// ABOUTME: Pure parsing and matching; first matching value wins for each setting.

use std::path::Path;

/// One `Host` block, or the implicit global block before the first `Host` line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostBlock {
    patterns: Vec<String>,
    /// `Match` blocks are skipped entirely.
    enabled: bool,
    entries: Vec<(String, String)>,
}

impl HostBlock {
    fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            enabled: true,
            entries: Vec::new(),
        }
    }

    fn matches(&self, host: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let mut matched = false;
        for pattern in &self.patterns {
            if let Some(negated) = pattern.strip_prefix('!') {
                if wildcard_match(negated.as_bytes(), host.as_bytes()) {
                    return false;
                }
            } else if wildcard_match(pattern.as_bytes(), host.as_bytes()) {
                matched = true;
            }
        }
        matched
    }
}

/// Settings that apply to one host after resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSettings {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// In the order they were found; later blocks append.
    pub identity_files: Vec<String>,
}

/// A parsed ssh client configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfig {
    blocks: Vec<HostBlock>,
}

impl SshConfig {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut blocks = vec![HostBlock::new(vec!["*".to_string()])];

        for line in text.lines() {
            let Some((key, value)) = split_line(line) else {
                continue;
            };
            match key.as_str() {
                "host" => {
                    let patterns = value
                        .split(|c: char| c.is_whitespace() || c == ',')
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect();
                    blocks.push(HostBlock::new(patterns));
                }
                "match" => {
                    let mut block = HostBlock::new(Vec::new());
                    block.enabled = false;
                    blocks.push(block);
                }
                _ => {
                    if let Some(block) = blocks.last_mut() {
                        block.entries.push((key, value));
                    }
                }
            }
        }

        Self { blocks }
    }

    /// Walk blocks top to bottom; each setting keeps the first value seen
    /// in a matching block, so specific blocks above `Host *` take priority
    /// while unset settings fall through to later blocks.
    pub fn resolve(&self, host: &str) -> HostSettings {
        let mut settings = HostSettings::default();

        for block in self.blocks.iter().filter(|block| block.matches(host)) {
            for (key, value) in &block.entries {
                match key.as_str() {
                    "hostname" if settings.hostname.is_none() => {
                        settings.hostname = Some(value.replace("%h", host));
                    }
                    "port" if settings.port.is_none() => match value.parse::<u16>() {
                        Ok(port) => settings.port = Some(port),
                        Err(_) => tracing::warn!("Ignoring invalid Port [{}] for {}", value, host),
                    },
                    "user" if settings.user.is_none() => settings.user = Some(value.clone()),
                    "identityfile" if !settings.identity_files.contains(value) => {
                        settings.identity_files.push(value.clone());
                    }
                    _ => {}
                }
            }
        }

        settings
    }
}

/// Split `Key value` or `Key=value`, lowercasing the key and unquoting the value.
fn split_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let split_at = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let key = line[..split_at].to_ascii_lowercase();
    let value = line[split_at..]
        .trim_start_matches(|c: char| c.is_whitespace() || c == '=')
        .trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    if value.is_empty() {
        return None;
    }
    Some((key, value.to_string()))
}

/// Case-insensitive glob with `*` and `?`.
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p].eq_ignore_ascii_case(&text[t])) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
