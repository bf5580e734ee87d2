//! Icinga2 host and service notifications.
//!
//! Posted by an Icinga2 notification command as JSON. The kind is derived
//! from the notification `type` and the state fields:
//!
//! 1. `ACKNOWLEDGEMENT`
//! 2. `RECOVERY`
//! 3. state type changed (soft to hard): "entered state", plus check output
//! 4. same state as before: renotification with the age of the state
//! 5. anything else: state change, plus check output

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use super::format::{paint, since, Color};
use super::{Notification, SourceError};
use crate::routing::ChannelMapping;

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A host check.
    Host,
    /// A service check on a host.
    Service,
}

/// Classified notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Someone acknowledged the problem.
    Acknowledgement,
    /// Back to OK/UP.
    Recovery,
    /// The state became hard.
    StateEntered,
    /// Reminder for an unchanged state.
    Renotification,
    /// Moved from one state to another.
    StateChange,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Checkable {
    name: String,
    display_name: String,
    hostgroups: Vec<String>,
    state: String,
    state_type: String,
    last_state: String,
    last_state_type: String,
    output: String,
    #[serde(deserialize_with = "unix_time")]
    last_state_change: Option<DateTime<Utc>>,
}

impl Checkable {
    fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Icinga2Notification {
    author: String,
    target: String,
    #[serde(rename = "type")]
    kind: String,
    host: Checkable,
    service: Checkable,
}

impl Icinga2Notification {
    fn target(&self) -> Option<Target> {
        match self.target.as_str() {
            "host" => Some(Target::Host),
            "service" => Some(Target::Service),
            _ => None,
        }
    }

    fn subject(&self, target: Target) -> &Checkable {
        match target {
            Target::Host => &self.host,
            Target::Service => &self.service,
        }
    }

    fn classify(&self, target: Target) -> NotificationKind {
        let subject = self.subject(target);
        match self.kind.as_str() {
            "ACKNOWLEDGEMENT" => NotificationKind::Acknowledgement,
            "RECOVERY" => NotificationKind::Recovery,
            _ if subject.last_state_type != subject.state_type => NotificationKind::StateEntered,
            _ if subject.last_state == subject.state => NotificationKind::Renotification,
            _ => NotificationKind::StateChange,
        }
    }
}

/// Accepts a Unix timestamp as a JSON number or numeric string.
fn unix_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.trim().to_owned(),
        _ => return Ok(None),
    };
    // Sub-second precision is dropped.
    let seconds = text
        .split('.')
        .next()
        .and_then(|whole| whole.parse::<i64>().ok());
    Ok(seconds.and_then(|s| DateTime::from_timestamp(s, 0)))
}

/// Colored host state name.
pub fn host_state(state: &str) -> String {
    match state {
        "UP" => paint(Color::Green, "Up"),
        "DOWN" => paint(Color::Red, "Down"),
        "UNREACHABLE" => paint(Color::Pink, "Unreachable"),
        other => other.to_owned(),
    }
}

/// Colored service state name.
pub fn service_state(state: &str) -> String {
    match state {
        "OK" => paint(Color::Green, "Ok"),
        "WARNING" => paint(Color::Yellow, "Warning"),
        "CRITICAL" => paint(Color::Red, "Critical"),
        "UNKNOWN" => paint(Color::Pink, "Unknown"),
        other => other.to_owned(),
    }
}

/// Renders Icinga2 notifications.
#[derive(Debug, Clone)]
pub struct Icinga2Source {
    mapping: ChannelMapping,
}

impl Icinga2Source {
    /// Create a source routing by host name, then host group.
    pub fn new(mapping: ChannelMapping) -> Self {
        Self { mapping }
    }

    /// Every channel the mapping can produce.
    pub fn channel_list(&self) -> BTreeSet<String> {
        self.mapping.channel_list()
    }

    /// Render one notification against the current time.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] for a malformed body.
    pub fn render(&self, body: &[u8]) -> Result<Vec<Notification>, SourceError> {
        self.render_at(body, Utc::now())
    }

    /// Render one notification, computing state ages relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] for a malformed body.
    pub fn render_at(
        &self,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, SourceError> {
        let notification: Icinga2Notification = serde_json::from_slice(body)?;
        debug!(
            notification_target = %notification.target,
            "got a request for the icinga2 module"
        );

        let Some(target) = notification.target() else {
            warn!(
                notification_target = %notification.target,
                "unknown icinga2 notification target"
            );
            return Ok(Vec::new());
        };

        let kind = notification.classify(target);
        let lines = render_lines(&notification, target, kind, now);
        let channels = self
            .mapping
            .resolve_with_groups(&notification.host.name, &notification.host.hostgroups);

        info!(
            host = %notification.host.name,
            event_type = ?kind,
            channels = channels.len(),
            "rendered icinga2 notification"
        );
        Ok(vec![Notification { channels, lines }])
    }
}

fn render_lines(
    n: &Icinga2Notification,
    target: Target,
    kind: NotificationKind,
    now: DateTime<Utc>,
) -> Vec<String> {
    let subject = n.subject(target);
    let color_state = match target {
        Target::Host => host_state,
        Target::Service => service_state,
    };
    let state = color_state(&subject.state);
    let last_state = color_state(&subject.last_state);
    let age = subject.last_state_change.map(|t| since(t, now));

    let (noun, who) = match target {
        Target::Host => ("Host", paint(Color::LightBlue, subject.label())),
        Target::Service => (
            "Service",
            format!(
                "{} ({})",
                paint(Color::LightBlue, subject.label()),
                paint(Color::Grey, n.host.label())
            ),
        ),
    };

    let headline = match kind {
        NotificationKind::Acknowledgement => {
            let state_info = match &age {
                Some(age) => format!("{state} {age}"),
                None => state,
            };
            format!(
                "{} acknowledged {} {} (State {state_info})",
                n.author,
                noun.to_lowercase(),
                paint(Color::LightBlue, subject.label())
            )
        }
        NotificationKind::Recovery => format!(
            "{noun} {who} {} from state {last_state}",
            paint(Color::Green, "recovered")
        ),
        NotificationKind::StateEntered => format!("{noun} {who} entered state {state}"),
        NotificationKind::Renotification => match &age {
            Some(age) => format!("{noun} {who} is still in state {state} ({age})"),
            None => format!("{noun} {who} is still in state {state}"),
        },
        NotificationKind::StateChange => {
            format!("{noun} {who} transitioned from state {last_state} to {state}")
        }
    };

    let mut lines = vec![headline];
    if matches!(
        kind,
        NotificationKind::StateEntered | NotificationKind::StateChange
    ) {
        lines.push(format!("→ {}", subject.output));
    }
    lines
}
