//! JSON configuration loader.
//!
//! Text is first decoded into [`JsonConfig`], a loose mirror of the on-disk
//! schema, and then built into the engine-native [`CoreConfig`]. Keeping the
//! two steps apart lets hosts tell malformed JSON from a well-formed file that
//! asks for something the core cannot do.

use crate::logger::{self, BreadcrumbFlags, LogLevel};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Minimal working configuration: SOCKS on 1080, direct outbound.
pub const TEMPLATE: &str = r#"{
  "log": {
    "loglevel": "info"
  },
  "inbounds": [
    {
      "port": 1080,
      "protocol": "socks",
      "settings": {
        "udp": true
      }
    }
  ],
  "outbounds": [
    {
      "protocol": "freedom"
    }
  ]
}"#;

const DEFAULT_LISTEN: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0}")]
    Syntax(#[from] serde_json::Error),
    #[error("{0}")]
    Build(#[from] BuildError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("unknown inbound protocol: {0}")]
    UnknownInbound(String),
    #[error("unknown outbound protocol: {0}")]
    UnknownOutbound(String),
    #[error("invalid listen address: {0}")]
    InvalidListen(String),
    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
    #[error("invalid {protocol} settings: {reason}")]
    InvalidSettings { protocol: String, reason: String },
}

#[derive(Debug, Default, Deserialize)]
pub struct JsonConfig {
    #[serde(default)]
    pub log: Option<LogJson>,
    #[serde(default)]
    pub inbounds: Vec<InboundJson>,
    #[serde(default)]
    pub outbounds: Vec<OutboundJson>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogJson {
    #[serde(default)]
    pub loglevel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundJson {
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct OutboundJson {
    pub protocol: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SocksSettingsJson {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    udp: bool,
}

#[derive(Debug, Deserialize)]
struct DokodemoSettingsJson {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

/// Engine-native configuration produced by [`JsonConfig::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub log_level: Option<LogLevel>,
    pub inbounds: Vec<InboundConfig>,
    pub outbounds: Vec<OutboundConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundConfig {
    pub tag: Option<String>,
    pub listen: SocketAddr,
    pub kind: InboundKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Socks { accounts: Vec<Account>, udp: bool },
    Http,
    DokodemoDoor { address: String, port: u16 },
}

impl InboundKind {
    pub fn protocol(&self) -> &'static str {
        match self {
            InboundKind::Socks { .. } => "socks",
            InboundKind::Http => "http",
            InboundKind::DokodemoDoor { .. } => "dokodemo-door",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub user: String,
    pub pass: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundConfig {
    pub tag: Option<String>,
    pub kind: OutboundKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    Freedom,
    Blackhole,
}

impl OutboundKind {
    pub fn protocol(self) -> &'static str {
        match self {
            OutboundKind::Freedom => "freedom",
            OutboundKind::Blackhole => "blackhole",
        }
    }
}

/// Decodes JSON text without building it.
pub fn parse(text: &str) -> Result<JsonConfig, ConfigError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes and builds JSON text.
pub fn from_str(text: &str) -> Result<CoreConfig, ConfigError> {
    Ok(parse(text)?.build()?)
}

/// Reads, decodes and builds a configuration file.
pub fn load(path: &Path) -> Result<CoreConfig, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let json: JsonConfig = serde_json::from_reader(BufReader::new(file))?;
    logger::breadcrumb(
        BreadcrumbFlags::CONFIG,
        format!("loaded configuration from {}", path.display()),
    );
    Ok(json.build()?)
}

impl JsonConfig {
    pub fn build(self) -> Result<CoreConfig, BuildError> {
        let log_level = match self.log.and_then(|log| log.loglevel) {
            Some(name) => Some(LogLevel::parse(&name).ok_or(BuildError::UnknownLogLevel(name))?),
            None => None,
        };
        let inbounds = self
            .inbounds
            .into_iter()
            .map(InboundJson::build)
            .collect::<Result<Vec<_>, _>>()?;
        let outbounds = self
            .outbounds
            .into_iter()
            .map(OutboundJson::build)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CoreConfig {
            log_level,
            inbounds,
            outbounds,
        })
    }
}

impl InboundJson {
    fn build(self) -> Result<InboundConfig, BuildError> {
        let ip = match self.listen.as_deref() {
            None | Some("") => DEFAULT_LISTEN,
            Some(text) => text
                .parse::<IpAddr>()
                .map_err(|_| BuildError::InvalidListen(text.to_string()))?,
        };
        let protocol = self.protocol.to_ascii_lowercase();
        let kind = match protocol.as_str() {
            "socks" => socks_settings(self.settings)?,
            "http" => InboundKind::Http,
            "dokodemo-door" => dokodemo_settings(self.settings)?,
            _ => return Err(BuildError::UnknownInbound(self.protocol)),
        };
        Ok(InboundConfig {
            tag: self.tag.filter(|tag| !tag.is_empty()),
            listen: SocketAddr::new(ip, self.port),
            kind,
        })
    }
}

impl OutboundJson {
    fn build(self) -> Result<OutboundConfig, BuildError> {
        let kind = match self.protocol.to_ascii_lowercase().as_str() {
            "freedom" | "direct" => OutboundKind::Freedom,
            "blackhole" | "block" => OutboundKind::Blackhole,
            _ => return Err(BuildError::UnknownOutbound(self.protocol)),
        };
        Ok(OutboundConfig {
            tag: self.tag.filter(|tag| !tag.is_empty()),
            kind,
        })
    }
}

fn settings<T: for<'de> Deserialize<'de>>(
    protocol: &str,
    value: Option<Value>,
) -> Result<Option<T>, BuildError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|error| invalid(protocol, error.to_string())),
    }
}

fn socks_settings(value: Option<Value>) -> Result<InboundKind, BuildError> {
    let parsed: SocksSettingsJson = settings("socks", value)?.unwrap_or_default();
    let accounts = match parsed.auth.as_deref().unwrap_or("noauth") {
        "noauth" => Vec::new(),
        "password" if parsed.accounts.is_empty() => {
            return Err(invalid("socks", "password auth requires accounts"));
        }
        "password" => parsed.accounts,
        other => return Err(invalid("socks", format!("unknown auth method {other}"))),
    };
    Ok(InboundKind::Socks {
        accounts,
        udp: parsed.udp,
    })
}

fn dokodemo_settings(value: Option<Value>) -> Result<InboundKind, BuildError> {
    let parsed: DokodemoSettingsJson = settings("dokodemo-door", value)?
        .ok_or_else(|| invalid("dokodemo-door", "settings are required"))?;
    let address = parsed
        .address
        .filter(|address| !address.is_empty())
        .ok_or_else(|| invalid("dokodemo-door", "address is required"))?;
    let port = parsed
        .port
        .filter(|port| *port != 0)
        .ok_or_else(|| invalid("dokodemo-door", "port is required"))?;
    Ok(InboundKind::DokodemoDoor { address, port })
}

fn invalid(protocol: &str, reason: impl Into<String>) -> BuildError {
    BuildError::InvalidSettings {
        protocol: protocol.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests;
