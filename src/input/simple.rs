//! Plain-text source: every non-empty body line becomes one message line.

use std::collections::BTreeSet;

use tracing::debug;

use super::{Notification, SourceError, WebhookRequest};
use crate::irc::protocol;

/// Query parameter selecting the destination channel.
pub const CHANNEL_PARAM: &str = "channel";

/// Relays posted text to a channel.
#[derive(Debug, Clone)]
pub struct SimpleSource {
    default_channel: String,
}

impl SimpleSource {
    /// Create a source posting to `default_channel` unless the request names one.
    pub fn new(default_channel: &str) -> Self {
        Self {
            default_channel: default_channel.to_owned(),
        }
    }

    /// The default channel.
    pub fn channel_list(&self) -> BTreeSet<String> {
        BTreeSet::from([self.default_channel.clone()])
    }

    /// Split the body into lines and address them.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Encoding`] if the body is not UTF-8 and
    /// [`SourceError::InvalidChannel`] if the requested channel is not a
    /// usable channel name.
    pub fn render(&self, request: &WebhookRequest) -> Result<Vec<Notification>, SourceError> {
        let channel = request
            .query
            .get(CHANNEL_PARAM)
            .filter(|channel| !channel.is_empty())
            .unwrap_or(&self.default_channel);
        if !protocol::is_valid_channel(channel) {
            return Err(SourceError::InvalidChannel(channel.clone()));
        }

        let text = std::str::from_utf8(&request.body).map_err(|_| SourceError::Encoding)?;
        let lines: Vec<String> = text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        if lines.is_empty() {
            debug!("ignoring empty simple request");
            return Ok(Vec::new());
        }

        Ok(vec![Notification {
            channels: BTreeSet::from([channel.clone()]),
            lines,
        }])
    }
}
