//! Configuration module for resolving a transfer run
//!
//! CLI values are merged with environment defaults into an immutable
//! [`TransferConfig`]. A CLI value always wins over the environment, and
//! the environment wins over the built-in defaults.

use crate::snapshot::SnapshotRef;
use crate::{Result, SnapCopyError};
use reqwest::Url;
use snapcopy_retry::{PollPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Source server base URL
pub const ENV_URL_DOWNLOAD: &str = "IPF_URL_DOWNLOAD";
/// Source server credential (token or `('user', 'password')`)
pub const ENV_AUTH_DOWNLOAD: &str = "IPF_AUTH_DOWNLOAD";
/// Destination server base URL
pub const ENV_URL_UPLOAD: &str = "IPF_URL_UPLOAD";
/// Destination server credential (token or `('user', 'password')`)
pub const ENV_AUTH_UPLOAD: &str = "IPF_AUTH_UPLOAD";
/// Older spelling of [`ENV_AUTH_DOWNLOAD`], read when it is unset
pub const ENV_TOKEN_DOWNLOAD: &str = "IPF_TOKEN_DOWNLOAD";
/// Older spelling of [`ENV_AUTH_UPLOAD`], read when it is unset
pub const ENV_TOKEN_UPLOAD: &str = "IPF_TOKEN_UPLOAD";
/// TLS certificate verification toggle
pub const ENV_VERIFY: &str = "IPF_VERIFY";

/// Credential used to authenticate against an IP Fabric server
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// API token sent as `X-API-Token`
    Token(String),
    /// Username/password pair exchanged for an access token at login
    UserPassword { username: String, password: String },
}

impl Credential {
    /// Short description safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Token(_) => "api-token",
            Credential::UserPassword { .. } => "username/password",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token(***)"),
            Credential::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

impl FromStr for Credential {
    type Err = SnapCopyError;

    /// Parses `('user', 'password')` into a user/password pair; anything else
    /// is taken as an API token.
    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SnapCopyError::config("credential cannot be empty"));
        }
        Ok(parse_user_password(raw).unwrap_or_else(|| Credential::Token(raw.to_string())))
    }
}

fn parse_user_password(raw: &str) -> Option<Credential> {
    let inner = raw.strip_prefix('(')?.strip_suffix(')')?.trim();
    let (username, rest) = split_quoted(inner)?;
    let rest = rest.trim_start().strip_prefix(',')?;
    let password = unquote(rest.trim().trim_end_matches(',').trim())?;
    if username.is_empty() {
        return None;
    }
    Some(Credential::UserPassword {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Split a leading quoted value off `value`, returning it and the remainder
fn split_quoted(value: &str) -> Option<(&str, &str)> {
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let body = &value[1..];
    let end = body.find(quote)?;
    Some((&body[..end], &body[end + 1..]))
}

fn unquote(value: &str) -> Option<&str> {
    match split_quoted(value)? {
        (inner, "") => Some(inner),
        _ => None,
    }
}

/// Which side of the copy a server is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Source,
    Destination,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Source => f.write_str("source"),
            ServerRole::Destination => f.write_str("destination"),
        }
    }
}

/// Base URL plus credential of one IP Fabric server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    base_url: String,
    pub credential: Credential,
}

impl ServerEndpoint {
    /// Build an endpoint, defaulting the scheme to `https://`
    pub fn new(url: &str, credential: Credential) -> Result<Self> {
        let url = url.trim();
        let candidate = if url.contains("://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };
        let parsed = Url::parse(&candidate)
            .map_err(|e| SnapCopyError::config(format!("invalid server URL '{url}': {e}")))?;
        if parsed.host_str().is_none() {
            return Err(SnapCopyError::config(format!(
                "invalid server URL '{url}': missing host"
            )));
        }
        Ok(Self {
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            credential,
        })
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Lookup of environment variables
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Variables from a `.env` file layered over the process environment
///
/// Values in the file win over the process environment, so a `.env` next to
/// the working directory fully describes the servers of a run.
#[derive(Debug, Clone, Default)]
pub struct DotenvEnv {
    path: Option<PathBuf>,
    vars: HashMap<String, String>,
}

impl DotenvEnv {
    /// Look for `.env` in the working directory and its ancestors; a missing
    /// file yields the plain process environment
    pub fn discover() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        match cwd
            .ancestors()
            .map(|dir| dir.join(".env"))
            .find(|candidate| candidate.is_file())
        {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    /// Read variables from the given `.env` file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let invalid = |e: dotenvy::Error| {
            SnapCopyError::config(format!("invalid .env file {}: {e}", path.display()))
        };

        let mut vars = HashMap::new();
        for item in dotenvy::from_path_iter(path).map_err(invalid)? {
            let (key, value) = item.map_err(invalid)?;
            vars.insert(key, value);
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            vars,
        })
    }

    /// The file the variables were read from, if one was found
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl EnvSource for DotenvEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned().or_else(|| ProcessEnv.var(key))
    }
}

/// Values given on the command line; `None` means "not given"
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub snapshot: Option<String>,
    pub source_url: Option<String>,
    pub source_auth: Option<String>,
    pub destination_url: Option<String>,
    pub destination_auth: Option<String>,
    pub keep_archive: bool,
    pub timeout_secs: Option<u64>,
    pub interval_secs: Option<u64>,
    pub download_dir: Option<PathBuf>,
    pub insecure: bool,
}

/// Fully resolved configuration of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub snapshot: SnapshotRef,
    pub source: ServerEndpoint,
    pub destination: ServerEndpoint,
    pub poll: PollPolicy,
    pub keep_archive: bool,
    pub download_dir: PathBuf,
    pub verify_tls: bool,
}

impl TransferConfig {
    /// Merge CLI overrides with the environment and validate the result
    pub fn resolve(overrides: ConfigOverrides, env: &impl EnvSource) -> Result<Self> {
        let pick = |cli: Option<String>, key: &str| -> Option<String> {
            non_empty(cli).or_else(|| non_empty(env.var(key)))
        };

        let snapshot = non_empty(overrides.snapshot)
            .map(|s| s.parse::<SnapshotRef>())
            .transpose()?
            .unwrap_or_default();

        let source = endpoint(
            ServerRole::Source,
            pick(overrides.source_url, ENV_URL_DOWNLOAD),
            ENV_URL_DOWNLOAD,
            pick(overrides.source_auth, ENV_AUTH_DOWNLOAD)
                .or_else(|| non_empty(env.var(ENV_TOKEN_DOWNLOAD))),
            ENV_AUTH_DOWNLOAD,
        )?;
        let destination = endpoint(
            ServerRole::Destination,
            pick(overrides.destination_url, ENV_URL_UPLOAD),
            ENV_URL_UPLOAD,
            pick(overrides.destination_auth, ENV_AUTH_UPLOAD)
                .or_else(|| non_empty(env.var(ENV_TOKEN_UPLOAD))),
            ENV_AUTH_UPLOAD,
        )?;

        let interval = overrides
            .interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let timeout = overrides
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_TIMEOUT);
        if timeout.is_zero() {
            return Err(SnapCopyError::config("timeout must be greater than zero"));
        }
        if interval.is_zero() {
            return Err(SnapCopyError::config(
                "poll interval must be greater than zero",
            ));
        }
        if interval > timeout {
            return Err(SnapCopyError::config(format!(
                "poll interval ({}s) cannot exceed the timeout ({}s)",
                interval.as_secs(),
                timeout.as_secs()
            )));
        }

        let verify_tls = !overrides.insecure && parse_verify(env.var(ENV_VERIFY));

        Ok(Self {
            snapshot,
            source,
            destination,
            poll: PollPolicy::new(interval, timeout),
            keep_archive: overrides.keep_archive,
            download_dir: overrides
                .download_dir
                .unwrap_or_else(|| PathBuf::from(".")),
            verify_tls,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn endpoint(
    role: ServerRole,
    url: Option<String>,
    url_var: &str,
    auth: Option<String>,
    auth_var: &str,
) -> Result<ServerEndpoint> {
    let url = url.ok_or_else(|| {
        SnapCopyError::config(format!(
            "{role} server URL is missing (pass it on the command line or set {url_var})"
        ))
    })?;
    let auth = auth.ok_or_else(|| {
        SnapCopyError::config(format!(
            "{role} server credential is missing (pass it on the command line or set {auth_var})"
        ))
    })?;
    ServerEndpoint::new(&url, auth.parse()?)
}

fn parse_verify(value: Option<String>) -> bool {
    match value {
        Some(v) => !matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => true,
    }
}
