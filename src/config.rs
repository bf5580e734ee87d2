//! Configuration loading and validation.
//!
//! cpthook reads a single TOML file. Module tables under `[modules.<name>]`
//! carry a `type` tag selecting the webhook source; everything else
//! (logging, HTTP listener, IRC connection) has its own section.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::irc::protocol;
use crate::routing::ChannelMapping;

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cpthook.toml";

/// Endpoint reserved for the health report.
pub const HEALTH_ENDPOINT: &str = "/health";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level and optional JSON log directory.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP listener.
    #[serde(default)]
    pub http: HttpConfig,

    /// IRC connection.
    pub irc: IrcConfig,

    /// Optional `.env` file holding secrets referenced by `*_env` keys.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Webhook sources keyed by module name.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleEntry>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rotated JSON logs. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8086`.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// IRC connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcConfig {
    /// Server host name.
    pub host: String,

    /// Server port.
    #[serde(default = "default_irc_port")]
    pub port: u16,

    /// Connect with TLS.
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Bot nickname.
    pub nickname: String,

    /// Real name sent during registration.
    #[serde(default = "default_realname")]
    pub realname: String,

    /// PEM bundle of trusted roots; the bundled web PKI roots otherwise.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Client certificate presented during the TLS handshake.
    #[serde(default)]
    pub client_cert: Option<ClientCertConfig>,

    /// Channels joined at startup in addition to every module's channels.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Optional SASL authentication.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// `[irc.client_cert]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCertConfig {
    /// PEM certificate chain.
    pub cert_file: PathBuf,
    /// PEM private key.
    pub key_file: PathBuf,
}

/// Supported authentication methods.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum AuthConfig {
    /// SASL PLAIN with a password read from the credentials file or environment.
    SaslPlain {
        /// Account name.
        username: String,
        /// Name of the variable holding the password.
        password_env: String,
    },
    /// SASL EXTERNAL, authenticated by `irc.client_cert`.
    SaslExternal {
        /// Authorization identity; the certificate's own when unset.
        #[serde(default)]
        identity: Option<String>,
    },
}

/// One `[modules.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleEntry {
    /// Disabled modules are parsed but get no route.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP path; defaults to `/<name>`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Source-specific settings, selected by `type`.
    #[serde(flatten)]
    pub source: SourceConfig,
}

impl ModuleEntry {
    /// Endpoint path for a module registered under `name`.
    pub fn endpoint_for(&self, name: &str) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("/{name}"))
    }
}

/// Source-specific configuration, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// GitLab system and project hooks.
    Gitlab(GitlabConfig),
    /// Prometheus Alertmanager webhook receiver.
    Prometheus(PrometheusConfig),
    /// Icinga2 notification script posts.
    Icinga2(Icinga2Config),
    /// Plain-text lines posted to a channel.
    Simple(SimpleConfig),
    /// Travis CI build notifications.
    Travis(TravisConfig),
}

impl SourceConfig {
    /// Short name of the source kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gitlab(_) => "gitlab",
            Self::Prometheus(_) => "prometheus",
            Self::Icinga2(_) => "icinga2",
            Self::Simple(_) => "simple",
            Self::Travis(_) => "travis",
        }
    }

    /// Channel used when routing finds nothing more specific.
    pub fn default_channel(&self) -> &str {
        match self {
            Self::Gitlab(c) => &c.default,
            Self::Prometheus(c) => &c.channel,
            Self::Icinga2(c) => &c.default,
            Self::Simple(c) => &c.default_channel,
            Self::Travis(c) => &c.default_channel,
        }
    }

    /// Every channel a module of this kind can route to from its config.
    pub fn channel_list(&self) -> BTreeSet<String> {
        match self {
            Self::Gitlab(c) => c.mapping().channel_list(),
            Self::Prometheus(c) => c.mapping().channel_list(),
            Self::Icinga2(c) => c.mapping().channel_list(),
            Self::Simple(SimpleConfig { default_channel })
            | Self::Travis(TravisConfig { default_channel }) => {
                BTreeSet::from([default_channel.clone()])
            }
        }
    }
}

/// GitLab module settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GitlabConfig {
    /// Fallback channel.
    pub default: String,

    /// `group/project` path to channels.
    #[serde(default)]
    pub explicit: BTreeMap<String, Vec<String>>,

    /// Namespace prefix to channels; the deepest matching prefix wins.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,

    /// Maximum commits listed per push. Valid range 1..=20.
    #[serde(default)]
    pub commit_limit: Option<i64>,
}

impl GitlabConfig {
    /// Routing table for this module.
    pub fn mapping(&self) -> ChannelMapping {
        ChannelMapping::new(&self.default, self.explicit.clone(), self.groups.clone())
    }
}

/// Prometheus module settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    /// Channel for every alert without an explicit route.
    pub channel: String,

    /// Alert name to channels.
    #[serde(default)]
    pub explicit: BTreeMap<String, Vec<String>>,

    /// Regex whose first capture group shortens instance names.
    #[serde(default)]
    pub hostname_filter: Option<String>,
}

impl PrometheusConfig {
    /// Routing table for this module.
    pub fn mapping(&self) -> ChannelMapping {
        ChannelMapping::new(&self.channel, self.explicit.clone(), BTreeMap::new())
    }
}

/// Icinga2 module settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Icinga2Config {
    /// Fallback channel.
    pub default: String,

    /// Host name to channels.
    #[serde(default)]
    pub explicit: BTreeMap<String, Vec<String>>,

    /// Host group name to channels.
    #[serde(default)]
    pub hostgroups: BTreeMap<String, Vec<String>>,
}

impl Icinga2Config {
    /// Routing table for this module.
    pub fn mapping(&self) -> ChannelMapping {
        ChannelMapping::new(&self.default, self.explicit.clone(), self.hostgroups.clone())
    }
}

/// Simple module settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleConfig {
    /// Channel used when the request names none.
    pub default_channel: String,
}

/// Travis module settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TravisConfig {
    /// Channel every build is posted to.
    pub default_channel: String,
}

/// Invalid configuration detected after parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required string is blank.
    #[error("{0} must not be empty")]
    Empty(String),
    /// Nicknames cannot contain spaces.
    #[error("invalid nickname {0:?}")]
    InvalidNickname(String),
    /// Endpoints must be absolute paths.
    #[error("module {module}: endpoint {endpoint:?} must start with '/'")]
    InvalidEndpoint {
        /// Module name.
        module: String,
        /// Offending endpoint.
        endpoint: String,
    },
    /// Two enabled modules share an endpoint, or one shadows `/health`.
    #[error("endpoint {0:?} is used more than once")]
    DuplicateEndpoint(String),
    /// `hostname_filter` does not compile.
    #[error("module {module}: invalid hostname_filter: {reason}")]
    InvalidPattern {
        /// Module name.
        module: String,
        /// Regex compiler message.
        reason: String,
    },
    /// A channel name cannot be used as an IRC target.
    #[error("{field}: invalid channel name {channel:?}")]
    InvalidChannel {
        /// Where the channel was configured.
        field: String,
        /// Offending name.
        channel: String,
    },
    /// A TLS option is set while `irc.tls` is off.
    #[error("{0} requires irc.tls = true")]
    TlsRequired(&'static str),
    /// SASL EXTERNAL needs a certificate to authenticate with.
    #[error("sasl-external requires irc.client_cert")]
    MissingClientCert,
    /// No module is enabled.
    #[error("no module is enabled")]
    NoModules,
}

impl Config {
    /// Parse a config from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML, misses required keys,
    /// or fails [`Config::validate`].
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.irc.host.trim().is_empty() {
            return Err(ConfigError::Empty("irc.host".to_owned()));
        }
        if self.irc.nickname.trim().is_empty() {
            return Err(ConfigError::Empty("irc.nickname".to_owned()));
        }
        if self.irc.nickname.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidNickname(self.irc.nickname.clone()));
        }
        if !self.irc.tls {
            if self.irc.ca_file.is_some() {
                return Err(ConfigError::TlsRequired("irc.ca_file"));
            }
            if self.irc.client_cert.is_some() {
                return Err(ConfigError::TlsRequired("irc.client_cert"));
            }
        }
        if matches!(self.irc.auth, Some(AuthConfig::SaslExternal { .. }))
            && self.irc.client_cert.is_none()
        {
            return Err(ConfigError::MissingClientCert);
        }
        check_channels("irc.channels", &self.irc.channels)?;

        let mut endpoints = BTreeSet::from([HEALTH_ENDPOINT.to_owned()]);
        for (name, entry) in self.enabled_modules() {
            if entry.source.default_channel().trim().is_empty() {
                return Err(ConfigError::Empty(format!("modules.{name} default channel")));
            }
            check_channels(&format!("modules.{name}"), &entry.source.channel_list())?;

            let endpoint = entry.endpoint_for(name);
            if !endpoint.starts_with('/') {
                return Err(ConfigError::InvalidEndpoint {
                    module: name.clone(),
                    endpoint,
                });
            }
            if !endpoints.insert(endpoint.clone()) {
                return Err(ConfigError::DuplicateEndpoint(endpoint));
            }

            if let SourceConfig::Prometheus(PrometheusConfig {
                hostname_filter: Some(pattern),
                ..
            }) = &entry.source
            {
                regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    module: name.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        if endpoints.len() == 1 {
            return Err(ConfigError::NoModules);
        }
        Ok(())
    }

    /// Enabled modules in name order.
    pub fn enabled_modules(&self) -> impl Iterator<Item = (&String, &ModuleEntry)> {
        self.modules.iter().filter(|(_, entry)| entry.enabled)
    }
}

fn check_channels<'a>(
    field: &str,
    channels: impl IntoIterator<Item = &'a String>,
) -> Result<(), ConfigError> {
    match channels
        .into_iter()
        .find(|channel| !protocol::is_valid_channel(channel))
    {
        Some(channel) => Err(ConfigError::InvalidChannel {
            field: field.to_owned(),
            channel: channel.clone(),
        }),
        None => Ok(()),
    }
}

// Default value functions for serde

fn default_log_level() -> String {
    "info".to_owned()
}
fn default_listen() -> String {
    "0.0.0.0:8086".to_owned()
}
fn default_irc_port() -> u16 {
    6697
}
fn default_realname() -> String {
    "cpthook notification bot".to_owned()
}
fn default_true() -> bool {
    true
}

/// Load and validate the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    Config::from_toml(&contents)
        .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))
}
