//! Relay configuration: TOML file + CLI overrides.
//!
//! A missing config file is created with the defaults so operators have
//! something to edit. The resolved [`RelayConfig`] is built once at startup
//! and handed to the relay by value.

use lanrelay_core::{IceServer, RelayError, RelayResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::collections::HashSet;
use tracing::{info, warn};

/// Top-level config file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub join_code: JoinCodeSection,
    #[serde(default = "default_relays")]
    pub relays: Vec<RelaySection>,
    #[serde(default)]
    pub limits: LimitsSection,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            debug: false,
            server: ServerSection::default(),
            join_code: JoinCodeSection::default(),
            relays: default_relays(),
            limits: LimitsSection::default(),
        }
    }
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_comment")]
    pub comment: String,
    #[serde(default = "default_true")]
    pub show_local_worlds: bool,
    /// Seconds a connection may stay without a handshake. 0 disables.
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout: u64,
    #[serde(default)]
    pub close_on_session_error: bool,
    #[serde(default)]
    pub ip_forwarding: IpForwardingSection,
    #[serde(default)]
    pub origin_whitelist: OriginWhitelistSection,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            comment: default_comment(),
            show_local_worlds: true,
            pending_timeout: default_pending_timeout(),
            close_on_session_error: false,
            ip_forwarding: IpForwardingSection::default(),
            origin_whitelist: OriginWhitelistSection::default(),
        }
    }
}

/// `[server.ip_forwarding]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpForwardingSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_forward_headers")]
    pub headers: Vec<String>,
}

impl Default for IpForwardingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            headers: default_forward_headers(),
        }
    }
}

/// `[server.origin_whitelist]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginWhitelistSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_hostnames")]
    pub hostnames: Vec<String>,
}

impl Default for OriginWhitelistSection {
    fn default() -> Self {
        Self {
            enabled: false,
            hostnames: default_hostnames(),
        }
    }
}

/// `[join_code]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCodeSection {
    #[serde(default = "default_code_length")]
    pub length: usize,
    #[serde(default = "default_code_chars")]
    pub chars: String,
    #[serde(default)]
    pub mix_case: bool,
}

impl Default for JoinCodeSection {
    fn default() -> Self {
        Self {
            length: default_code_length(),
            chars: default_code_chars(),
            mix_case: false,
        }
    }
}

/// One `[[relays]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `[limits]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_worlds_per_ip")]
    pub worlds_per_ip: usize,
    #[serde(default = "default_world_ratelimit")]
    pub world_ratelimit: RateLimitSection,
    #[serde(default = "default_ping_ratelimit")]
    pub ping_ratelimit: RateLimitSection,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            worlds_per_ip: default_worlds_per_ip(),
            world_ratelimit: default_world_ratelimit(),
            ping_ratelimit: default_ping_ratelimit(),
        }
    }
}

/// `[limits.world_ratelimit]` / `[limits.ping_ratelimit]`. Times in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub period: u64,
    pub limit: u32,
    pub lockout_limit: u32,
    pub lockout_time: u64,
}

fn default_listen() -> String {
    "0.0.0.0:6699".to_string()
}
fn default_comment() -> String {
    "LAN World Relay".to_string()
}
fn default_pending_timeout() -> u64 {
    30
}
fn default_forward_headers() -> Vec<String> {
    vec!["CF-Connecting-IP".to_string(), "X-Real-IP".to_string()]
}
fn default_hostnames() -> Vec<String> {
    vec!["example.com".to_string()]
}
fn default_code_length() -> usize {
    5
}
fn default_code_chars() -> String {
    "abcdefghijklmnopqrstuvwxyz0123456789".to_string()
}
fn default_relays() -> Vec<RelaySection> {
    [
        "stun.l.google.com:19302",
        "stun1.l.google.com:19302",
        "stun2.l.google.com:19302",
        "stun3.l.google.com:19302",
        "stun4.l.google.com:19302",
    ]
    .into_iter()
    .map(|address| RelaySection {
        kind: "stun".to_string(),
        address: address.to_string(),
        username: None,
        password: None,
    })
    .collect()
}
fn default_worlds_per_ip() -> usize {
    32
}
fn default_world_ratelimit() -> RateLimitSection {
    RateLimitSection {
        enabled: true,
        period: 192,
        limit: 32,
        lockout_limit: 48,
        lockout_time: 600,
    }
}
fn default_ping_ratelimit() -> RateLimitSection {
    RateLimitSection {
        enabled: true,
        period: 256,
        limit: 128,
        lockout_limit: 192,
        lockout_time: 300,
    }
}
fn default_true() -> bool {
    true
}

/// Join code generation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCodePolicy {
    pub length: usize,
    pub chars: Vec<char>,
    pub mix_case: bool,
}

impl JoinCodePolicy {
    /// Draw a fresh code. Uniqueness is the caller's concern.
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| {
                let c = self.chars[rng.gen_range(0..self.chars.len())];
                if self.mix_case && rng.gen_bool(0.5) {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    }

    /// Canonical form of a code typed in by a joining player.
    pub fn normalize(&self, requested: &str) -> String {
        if self.mix_case {
            requested.to_string()
        } else {
            requested.to_lowercase()
        }
    }
}

/// Resolved limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub period: Duration,
    pub limit: u32,
    pub lockout_limit: u32,
    pub lockout_time: Duration,
}

impl From<&RateLimitSection> for RateLimitConfig {
    fn from(s: &RateLimitSection) -> Self {
        Self {
            enabled: s.enabled,
            period: Duration::from_secs(s.period),
            limit: s.limit,
            lockout_limit: s.lockout_limit,
            lockout_time: Duration::from_secs(s.lockout_time),
        }
    }
}

/// Resolved relay configuration (CLI overrides applied, values validated).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub debug: bool,
    pub listen: SocketAddr,
    pub comment: String,
    pub show_local_worlds: bool,
    pub pending_timeout: Option<Duration>,
    pub close_on_session_error: bool,
    pub ip_forwarding: bool,
    pub forward_headers: Vec<String>,
    pub origin_whitelist: bool,
    pub allowed_hostnames: Vec<String>,
    pub join_code: JoinCodePolicy,
    pub ice_servers: Vec<IceServer>,
    pub worlds_per_ip: usize,
    pub world_ratelimit: RateLimitConfig,
    pub ping_ratelimit: RateLimitConfig,
}

impl RelayConfig {
    /// Load config from TOML file, write the merged document back, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli_listen: Option<&str>) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    let parsed = toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?;
                    // Persist the merged document so new keys show up with their defaults.
                    if let Err(e) = write_config(&expanded, &parsed) {
                        warn!(path = %expanded.display(), error = %e, "could not write merged config back");
                    }
                    parsed
                } else {
                    info!(path = %expanded.display(), "config file not found, writing defaults");
                    let defaults = ConfigFile::default();
                    write_config(&expanded, &defaults)?;
                    defaults
                }
            }
            None => ConfigFile::default(),
        };

        let mut config = Self::from_file(&file_config)?;
        if let Some(listen) = cli_listen {
            config.listen = parse_listen(listen)?;
        }
        Ok(config)
    }

    /// Resolve a parsed config file.
    pub fn from_file(file: &ConfigFile) -> RelayResult<Self> {
        let code = &file.join_code;
        if code.length == 0 || code.length > u8::MAX as usize {
            return Err(RelayError::Config(format!(
                "join_code.length must be between 1 and 255, got {}",
                code.length
            )));
        }
        // Joins lowercase the requested code unless mix_case is set, so codes
        // must be drawn from the lowercased alphabet.
        let mut chars: Vec<char> = if code.mix_case {
            code.chars.chars().collect()
        } else {
            code.chars.chars().flat_map(char::to_lowercase).collect()
        };
        let mut seen = HashSet::new();
        chars.retain(|c| seen.insert(*c));
        if chars.is_empty() {
            return Err(RelayError::Config("join_code.chars must not be empty".into()));
        }
        // The code travels as a str8 (at most 255 bytes).
        let widest = chars.iter().map(|c| c.len_utf8()).max().unwrap_or(1);
        if code.length * widest > u8::MAX as usize {
            return Err(RelayError::Config(format!(
                "join codes of {} chars from join_code.chars can exceed 255 bytes",
                code.length
            )));
        }

        let ice_servers = file
            .relays
            .iter()
            .map(|r| {
                let mut server = if r.kind.eq_ignore_ascii_case("stun") {
                    IceServer::stun(&r.address)
                } else {
                    IceServer::turn(
                        &r.address,
                        r.username.clone().unwrap_or_default(),
                        r.password.clone().unwrap_or_default(),
                    )
                };
                server.type_tag = r.kind.clone();
                server
            })
            .collect();

        Ok(Self {
            debug: file.debug,
            listen: parse_listen(&file.server.listen)?,
            comment: file.server.comment.clone(),
            show_local_worlds: file.server.show_local_worlds,
            pending_timeout: match file.server.pending_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            close_on_session_error: file.server.close_on_session_error,
            ip_forwarding: file.server.ip_forwarding.enabled,
            forward_headers: file.server.ip_forwarding.headers.clone(),
            origin_whitelist: file.server.origin_whitelist.enabled,
            allowed_hostnames: file.server.origin_whitelist.hostnames.clone(),
            join_code: JoinCodePolicy {
                length: code.length,
                chars,
                mix_case: code.mix_case,
            },
            ice_servers,
            worlds_per_ip: file.limits.worlds_per_ip,
            world_ratelimit: (&file.limits.world_ratelimit).into(),
            ping_ratelimit: (&file.limits.ping_ratelimit).into(),
        })
    }
}

fn parse_listen(s: &str) -> RelayResult<SocketAddr> {
    s.parse()
        .map_err(|e| RelayError::Config(format!("invalid listen address {s}: {e}")))
}

fn write_config(path: &Path, config: &ConfigFile) -> RelayResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| RelayError::Config(format!("config serialize error: {e}")))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
