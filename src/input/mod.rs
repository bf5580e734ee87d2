//! Webhook sources: decode a payload, pick destination channels, render lines.
//!
//! Every supported source is a variant of the closed [`Source`] enum, built
//! from its `[modules.<name>]` table. A source never touches the network; it
//! turns a [`WebhookRequest`] into zero or more [`Notification`]s, and
//! [`dispatch`] fans each one out into one queued message per channel.

use std::collections::{BTreeMap, BTreeSet};

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue};
use tracing::info;

use crate::config::{Config, SourceConfig};
use crate::dispatch::{OutboundMessage, QueueClosed, QueueSender};

pub mod format;
pub mod gitlab;
pub mod icinga2;
pub mod prometheus;
pub mod simple;
pub mod travis;

pub use gitlab::GitlabSource;
pub use icinga2::Icinga2Source;
pub use prometheus::PrometheusSource;
pub use simple::SimpleSource;
pub use travis::TravisSource;

/// Errors raised while building a source or handling one request.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The body is not the JSON shape this source expects.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// The body is not valid UTF-8 text.
    #[error("request body is not valid UTF-8")]
    Encoding,
    /// A header the source depends on is absent.
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    /// A form field the source depends on is absent.
    #[error("missing {0} form field")]
    MissingField(&'static str),
    /// A requested destination is not a usable channel name.
    #[error("invalid channel {0:?}")]
    InvalidChannel(String),
    /// A configured pattern does not compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// The parts of an inbound HTTP request a source may inspect.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Request headers.
    pub headers: HeaderMap,
    /// Decoded query string parameters.
    pub query: BTreeMap<String, String>,
    /// Raw body.
    pub body: Bytes,
}

impl WebhookRequest {
    /// Build a request with only a body.
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Add a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse::<HeaderValue>() {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Header value as text, if present and printable.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One rendered event and every channel it should reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Destination channels. Never empty.
    pub channels: BTreeSet<String>,
    /// Lines in emission order.
    pub lines: Vec<String>,
}

/// A configured webhook source.
#[derive(Debug)]
pub enum Source {
    /// GitLab hooks.
    Gitlab(GitlabSource),
    /// Prometheus Alertmanager.
    Prometheus(PrometheusSource),
    /// Icinga2 notifications.
    Icinga2(Icinga2Source),
    /// Plain-text lines.
    Simple(SimpleSource),
    /// Travis CI builds.
    Travis(TravisSource),
}

impl Source {
    /// Build a source from its config table.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Pattern`] if a Prometheus `hostname_filter`
    /// does not compile.
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(match config {
            SourceConfig::Gitlab(c) => Self::Gitlab(GitlabSource::new(c.mapping(), c.commit_limit)),
            SourceConfig::Prometheus(c) => Self::Prometheus(PrometheusSource::new(
                c.mapping(),
                c.hostname_filter.as_deref(),
            )?),
            SourceConfig::Icinga2(c) => Self::Icinga2(Icinga2Source::new(c.mapping())),
            SourceConfig::Simple(c) => Self::Simple(SimpleSource::new(&c.default_channel)),
            SourceConfig::Travis(c) => Self::Travis(TravisSource::new(&c.default_channel)),
        })
    }

    /// Short name of the source kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gitlab(_) => "gitlab",
            Self::Prometheus(_) => "prometheus",
            Self::Icinga2(_) => "icinga2",
            Self::Simple(_) => "simple",
            Self::Travis(_) => "travis",
        }
    }

    /// Every channel this source can route to.
    pub fn channel_list(&self) -> BTreeSet<String> {
        match self {
            Self::Gitlab(s) => s.channel_list(),
            Self::Prometheus(s) => s.channel_list(),
            Self::Icinga2(s) => s.channel_list(),
            Self::Simple(s) => s.channel_list(),
            Self::Travis(s) => s.channel_list(),
        }
    }

    /// Decode and render one request.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the request cannot be decoded. Nothing
    /// is rendered in that case.
    pub fn render(&self, request: &WebhookRequest) -> Result<Vec<Notification>, SourceError> {
        match self {
            Self::Gitlab(s) => s.render(request),
            Self::Prometheus(s) => s.render(&request.body),
            Self::Icinga2(s) => s.render(&request.body),
            Self::Simple(s) => s.render(request),
            Self::Travis(s) => s.render(request),
        }
    }
}

/// An enabled source bound to its HTTP endpoint.
#[derive(Debug)]
pub struct Module {
    /// Config table name.
    pub name: String,
    /// HTTP path the source listens on.
    pub endpoint: String,
    /// The source itself.
    pub source: Source,
}

/// Build every enabled module from the config.
///
/// # Errors
///
/// Returns the first [`SourceError`] raised while building a source.
pub fn modules_from_config(config: &Config) -> Result<Vec<Module>, SourceError> {
    config
        .enabled_modules()
        .map(|(name, entry)| {
            Ok(Module {
                name: name.clone(),
                endpoint: entry.endpoint_for(name),
                source: Source::from_config(&entry.source)?,
            })
        })
        .collect()
}

/// Channels to join on every connect: `extra` plus every module's channels.
pub fn join_list<'a>(
    modules: &[Module],
    extra: impl IntoIterator<Item = &'a String>,
) -> BTreeSet<String> {
    modules
        .iter()
        .flat_map(|module| module.source.channel_list())
        .chain(extra.into_iter().cloned())
        .filter(|channel| !channel.is_empty())
        .collect()
}

/// Enqueue one message per destination channel of every notification.
///
/// Returns the number of messages queued.
///
/// # Errors
///
/// Returns [`QueueClosed`] if the connection manager has stopped.
pub async fn dispatch(
    module: &str,
    notifications: Vec<Notification>,
    queue: &QueueSender,
) -> Result<usize, QueueClosed> {
    let mut queued: usize = 0;
    for notification in notifications {
        for channel in &notification.channels {
            let msg = OutboundMessage::new(channel.clone(), notification.lines.clone());
            info!(
                msg_id = %msg.id(),
                module,
                channel = %channel,
                "dispatching message to irc handler"
            );
            queue.enqueue(msg).await?;
            queued = queued.saturating_add(1);
        }
    }
    Ok(queued)
}
