//! Connection configuration.
//!
//! A configuration can come from an `htsp://` URL, from an INI file named
//! `htsp-client.ini` in the current directory, or from `HTSP_*`
//! environment variables, in that order of preference for [`load_config`].

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::{Host, Url};

use htsp_protocol::{ClientError, DEFAULT_HTSP_PORT, DEFAULT_HTTP_PORT};

const INI_FILE_NAME: &str = "htsp-client.ini";
const DEFAULT_CLIENT_NAME: &str = "htsp-client";

/// Connection configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Port of the HTTP interface used for recording downloads.
    pub http_port: u16,
    pub username: String,
    pub password: String,
    /// Sent to the server in `hello`.
    pub client_name: String,
    pub connect_timeout: Duration,
    /// How long a request waits for its reply.
    pub response_timeout: Duration,
    /// How long connecting waits for `initialSyncCompleted`.
    pub sync_timeout: Duration,
    /// Read timeout of one reader-loop poll.
    pub poll_interval: Duration,
    /// Player clock units per second for demuxed timestamps.
    pub time_base: i64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_HTSP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            username: String::new(),
            password: String::new(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            sync_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            time_base: 1_000_000,
        }
    }
}

/// Identity of a server login, used to share sessions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Characters left as is in URL credentials.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

impl ConnectionConfig {
    /// Parse `htsp://[user[:pass]@]host[:port]`.
    ///
    /// `tcp://` is accepted as an alias, and a bare `host[:port]` works too.
    pub fn from_url(url: &str) -> Result<Self, ClientError> {
        let invalid = |reason: &str| ClientError::ConnectionFailed(format!("{}: {}", reason, url));

        let full = if url.contains("://") {
            url.to_string()
        } else {
            format!("htsp://{}", url)
        };
        let parsed = Url::parse(&full).map_err(|e| invalid(&e.to_string()))?;

        if !matches!(parsed.scheme(), "htsp" | "tcp") {
            return Err(invalid("unsupported scheme"));
        }

        let host = match parsed.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(invalid("missing host")),
        };

        let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();

        Ok(Self {
            host,
            port: parsed.port().unwrap_or(DEFAULT_HTSP_PORT),
            username: decode(parsed.username()),
            password: parsed.password().map(decode).unwrap_or_default(),
            ..Self::default()
        })
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// HTTP URL serving the file of a finished recording.
    pub fn recording_url(&self, dvr_id: u32) -> String {
        let credentials = match (self.username.is_empty(), self.password.is_empty()) {
            (true, _) => String::new(),
            (false, true) => format!("{}@", utf8_percent_encode(&self.username, USERINFO)),
            (false, false) => format!(
                "{}:{}@",
                utf8_percent_encode(&self.username, USERINFO),
                utf8_percent_encode(&self.password, USERINFO)
            ),
        };
        format!(
            "http://{}{}:{}/dvrfile/{}",
            credentials,
            host_for_url(&self.host),
            self.http_port,
            dvr_id
        )
    }

    /// `host:port` suitable for socket address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", host_for_url(&self.host), self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("http_port", &self.http_port)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("client_name", &self.client_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .field("sync_timeout", &self.sync_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("time_base", &self.time_base)
            .finish()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "***"
    }
}

fn host_for_url(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// Load configuration.
///
/// Searches for configuration in the following order:
/// 1. `htsp-client.ini` in the current directory
/// 2. Environment variables (`HTSP_*`)
/// 3. Default values
pub fn load_config() -> ConnectionConfig {
    if let Some(ini_path) = find_ini_file() {
        info!("Loading configuration from {:?}", ini_path);
        if let Some(config) = load_from_ini(&ini_path) {
            return config;
        }
    }

    load_from_env()
}

fn find_ini_file() -> Option<PathBuf> {
    let ini_path = std::env::current_dir().ok()?.join(INI_FILE_NAME);
    ini_path.exists().then_some(ini_path)
}

/// Simple INI section parser.
fn parse_ini(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current_section = String::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current_section = line[1..line.len() - 1].to_string();
            sections.entry(current_section.clone()).or_default();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current_section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    sections
}

/// Load configuration from an INI file's `[Server]` section.
pub fn load_from_ini(path: &Path) -> Option<ConnectionConfig> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to read INI file: {}", e);
            return None;
        }
    };

    let sections = parse_ini(&content);
    let section = sections.get("Server")?;

    let config = build_config(|key| {
        let ini_key: &[&str] = match key {
            "HOST" => &["Host", "Address"],
            "PORT" => &["Port"],
            "HTTP_PORT" => &["HttpPort"],
            "USERNAME" => &["Username", "User"],
            "PASSWORD" => &["Password"],
            "CLIENT_NAME" => &["ClientName"],
            "CONNECT_TIMEOUT" => &["ConnectTimeout"],
            "RESPONSE_TIMEOUT" => &["ResponseTimeout"],
            "SYNC_TIMEOUT" => &["SyncTimeout"],
            _ => &[],
        };
        ini_key.iter().find_map(|k| section.get(*k).cloned())
    });

    debug!("Configuration loaded: server={}, user={}", config.address(), config.username);
    Some(config)
}

/// Load configuration from `HTSP_*` environment variables.
pub fn load_from_env() -> ConnectionConfig {
    let config = build_config(|key| std::env::var(format!("HTSP_{}", key)).ok());
    debug!(
        "Using environment/default config: server={}, user={}",
        config.address(),
        config.username
    );
    config
}

/// Assemble a config from a key lookup; unknown or unparsable values keep
/// their defaults. Timeouts are in milliseconds.
fn build_config<F>(get: F) -> ConnectionConfig
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ConnectionConfig::default();
    let millis = |key: &str, default: Duration| {
        get(key)
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    };

    ConnectionConfig {
        host: get("HOST").unwrap_or(defaults.host),
        port: get("PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port),
        http_port: get("HTTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.http_port),
        username: get("USERNAME").unwrap_or_default(),
        password: get("PASSWORD").unwrap_or_default(),
        client_name: get("CLIENT_NAME").unwrap_or(defaults.client_name),
        connect_timeout: millis("CONNECT_TIMEOUT", defaults.connect_timeout),
        response_timeout: millis("RESPONSE_TIMEOUT", defaults.response_timeout),
        sync_timeout: millis("SYNC_TIMEOUT", defaults.sync_timeout),
        ..defaults
    }
}
