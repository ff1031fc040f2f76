// ABOUTME: Runner parameter keys, discriminator values, and the string-keyed parameter map.
// ABOUTME: Parameters arrive as plain strings; typed accessors live here.

use std::collections::HashMap;

pub const PARAM_USERNAME: &str = "deployer.username";
pub const PARAM_PASSWORD: &str = "deployer.password";
pub const PARAM_TARGET_URL: &str = "deployer.targetUrl";
pub const PARAM_TRANSPORT: &str = "deployer.transport";
pub const PARAM_AUTH_METHOD: &str = "deployer.authMethod";
pub const PARAM_KEYFILE: &str = "deployer.keyFile";
pub const PARAM_UPLOADED_KEY: &str = "deployer.sshKey";
pub const PARAM_COMMAND: &str = "deployer.command";
pub const PARAM_PTY: &str = "deployer.pty";
pub const PARAM_AGENT_FORWARDING: &str = "deployer.agentForwarding";
pub const PARAM_FAIL_ON_EXIT_CODE: &str = "deployer.failOnExitCode";
pub const PARAM_FTP_MODE: &str = "deployer.ftp.mode";
pub const PARAM_FTP_TRANSFER_MODE: &str = "deployer.ftp.transferMode";

pub const TRANSPORT_EXEC: &str = "exec";
pub const TRANSPORT_SCP: &str = "scp";
pub const TRANSPORT_SFTP: &str = "sftp";
pub const TRANSPORT_FTP: &str = "ftp";
pub const TRANSPORT_SMB: &str = "smb";

pub const AUTH_METHOD_USER_PWD: &str = "password";
pub const AUTH_METHOD_ANONYMOUS: &str = "anonymous";
pub const AUTH_METHOD_CUSTOM_KEY: &str = "customKey";
pub const AUTH_METHOD_UPLOADED_KEY: &str = "uploadedKey";
pub const AUTH_METHOD_DEFAULT_KEY: &str = "defaultKey";

/// Placeholder credentials for anonymous logins; some servers reject an
/// empty password, so the placeholder password is a single space.
pub const ANONYMOUS_USER: &str = "anonymous";
pub const ANONYMOUS_PASSWORD: &str = " ";

pub const FTP_MODE_ACTIVE: &str = "ACTIVE";
pub const FTP_MODE_PASSIVE: &str = "PASSIVE";
pub const FTP_TRANSFER_BINARY: &str = "BINARY";
pub const FTP_TRANSFER_ASCII: &str = "ASCII";

/// Flat string-keyed runner parameters.
///
/// Blank values are treated the same as missing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerParams(HashMap<String, String>);

impl RunnerParams {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Value as given, blank or not. Passwords may legitimately be blank-looking.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// `true` only for a literal "true" (any case).
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Apply `key=value` overrides, as given on the command line.
    pub fn apply_overrides<'a>(
        &mut self,
        overrides: impl IntoIterator<Item = &'a str>,
    ) -> crate::error::Result<()> {
        for item in overrides {
            let (key, value) =
                item.split_once('=')
                    .ok_or_else(|| crate::error::Error::InvalidParameter {
                        name: "param",
                        reason: format!("expected key=value, got [{item}]"),
                    })?;
            self.insert(key.trim(), value);
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RunnerParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
