//! Prometheus Alertmanager webhook receiver.
//!
//! Alerts in one notification are split into firing and resolved groups;
//! each non-empty group becomes a two-line message (header plus instance
//! list), firing first.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::DateTime;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::format::{paint, Color};
use super::{Notification, SourceError};
use crate::routing::ChannelMapping;

/// Alert group state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    /// Still active.
    Firing,
    /// Ended after it started.
    Resolved,
}

impl AlertStatus {
    fn label(self) -> &'static str {
        match self {
            Self::Firing => "FIRING",
            Self::Resolved => "RESOLVED",
        }
    }

    fn color(self) -> Color {
        match self {
            Self::Firing => Color::Brown,
            Self::Resolved => Color::Green,
        }
    }
}

/// One alert from the Alertmanager payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Alert {
    /// Alert labels (`alertname`, `instance`, ...).
    pub labels: BTreeMap<String, String>,
    /// Alert annotations (`description`, `value`, ...).
    pub annotations: BTreeMap<String, String>,
    /// RFC 3339 start time.
    #[serde(rename = "startsAt")]
    pub starts_at: String,
    /// RFC 3339 end time; the zero time while firing.
    #[serde(rename = "endsAt")]
    pub ends_at: String,
}

impl Alert {
    /// Resolved when the end time lies after the start time.
    ///
    /// Unparsable timestamps count as firing.
    pub fn status(&self) -> AlertStatus {
        let start = DateTime::parse_from_rfc3339(&self.starts_at);
        let end = DateTime::parse_from_rfc3339(&self.ends_at);
        match (start, end) {
            (Ok(start), Ok(end)) if end > start => AlertStatus::Resolved,
            _ => AlertStatus::Firing,
        }
    }

    fn alertname(&self) -> &str {
        self.labels.get("alertname").map_or("", String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlertNotification {
    alerts: Vec<Alert>,
}

/// Renders Alertmanager notifications.
#[derive(Debug, Clone)]
pub struct PrometheusSource {
    mapping: ChannelMapping,
    hostname_filter: Option<Regex>,
}

impl PrometheusSource {
    /// Create a source; `hostname_filter` must contain a capture group to shorten names.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Pattern`] if the filter does not compile.
    pub fn new(
        mapping: ChannelMapping,
        hostname_filter: Option<&str>,
    ) -> Result<Self, SourceError> {
        let hostname_filter = hostname_filter
            .filter(|pattern| !pattern.is_empty())
            .map(Regex::new)
            .transpose()?;
        Ok(Self {
            mapping,
            hostname_filter,
        })
    }

    /// Every channel the mapping can produce.
    pub fn channel_list(&self) -> BTreeSet<String> {
        self.mapping.channel_list()
    }

    /// Render one Alertmanager notification.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] for a malformed body.
    pub fn render(&self, body: &[u8]) -> Result<Vec<Notification>, SourceError> {
        let notification: AlertNotification = serde_json::from_slice(body)?;
        debug!(alerts = notification.alerts.len(), "got a request for the prometheus module");

        let (firing, resolved): (Vec<&Alert>, Vec<&Alert>) = notification
            .alerts
            .iter()
            .partition(|alert| alert.status() == AlertStatus::Firing);

        let groups = [
            (AlertStatus::Firing, firing),
            (AlertStatus::Resolved, resolved),
        ];
        let rendered: Vec<Notification> = groups
            .into_iter()
            .filter_map(|(status, alerts)| self.render_group(status, &alerts))
            .collect();

        info!(messages = rendered.len(), "rendered prometheus notification");
        Ok(rendered)
    }

    fn render_group(&self, status: AlertStatus, alerts: &[&Alert]) -> Option<Notification> {
        let first = alerts.first()?;

        let mut header = format!(
            "[{}:{}] {}",
            paint(status.color(), status.label()),
            alerts.len(),
            first.alertname()
        );
        if status == AlertStatus::Firing {
            let description = first.annotations.get("description").map_or("", String::as_str);
            header.push_str(" - ");
            header.push_str(description);
        }

        let instances: Vec<String> = alerts
            .iter()
            .map(|alert| {
                let name = self.instance_name(alert);
                match alert.annotations.get("value").filter(|v| !v.is_empty()) {
                    Some(value) => format!("{name} ({value})"),
                    None => name,
                }
            })
            .collect();

        Some(Notification {
            channels: self.mapping.resolve(first.alertname()),
            lines: vec![header, format!("→ {}", instances.join(", "))],
        })
    }

    /// Display name of the alerting target.
    ///
    /// The `instance` label shortened by the hostname filter, else the alert
    /// name, else `unknown`.
    pub fn instance_name(&self, alert: &Alert) -> String {
        if let Some(instance) = alert.labels.get("instance") {
            return self.shorten(instance);
        }
        alert
            .labels
            .get("alertname")
            .cloned()
            .unwrap_or_else(|| "unknown".to_owned())
    }

    fn shorten(&self, name: &str) -> String {
        if name.parse::<IpAddr>().is_ok() {
            return name.to_owned();
        }
        self.hostname_filter
            .as_ref()
            .and_then(|pattern| pattern.captures(name))
            .and_then(|captures| captures.get(1))
            .map_or_else(|| name.to_owned(), |m| m.as_str().to_owned())
    }
}
