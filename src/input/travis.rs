//! Travis CI build notifications.
//!
//! Travis posts a form-encoded body whose `payload` field holds the build as
//! JSON. The repository slug comes from the `Travis-Repo-Slug` header.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::debug;

use super::format::{first_line, paint, Color};
use super::{Notification, SourceError, WebhookRequest};

/// Header carrying `owner/repository`.
pub const SLUG_HEADER: &str = "Travis-Repo-Slug";

/// Form field holding the JSON build.
pub const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Build {
    state: String,
    status_message: String,
    duration: Option<i64>,
    branch: String,
    message: String,
    author_name: String,
    repository: Repository,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Repository {
    name: String,
    owner_name: String,
}

/// Relays build starts and results to one channel.
#[derive(Debug, Clone)]
pub struct TravisSource {
    default_channel: String,
}

impl TravisSource {
    /// Create a source posting to `default_channel`.
    pub fn new(default_channel: &str) -> Self {
        Self {
            default_channel: default_channel.to_owned(),
        }
    }

    /// The default channel.
    pub fn channel_list(&self) -> BTreeSet<String> {
        BTreeSet::from([self.default_channel.clone()])
    }

    /// Decode the form body and render one line.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingField`] without a `payload` field,
    /// [`SourceError::Decode`] when it is not a build, and
    /// [`SourceError::MissingHeader`] when neither the slug header nor the
    /// payload names the repository.
    pub fn render(&self, request: &WebhookRequest) -> Result<Vec<Notification>, SourceError> {
        let payload = url::form_urlencoded::parse(&request.body)
            .find(|(key, _)| key == PAYLOAD_FIELD)
            .map(|(_, value)| value.into_owned())
            .ok_or(SourceError::MissingField(PAYLOAD_FIELD))?;
        let build: Build = serde_json::from_str(&payload)?;

        let slug = match request.header(SLUG_HEADER) {
            Some(slug) if !slug.is_empty() => slug.to_owned(),
            _ if !build.repository.owner_name.is_empty() && !build.repository.name.is_empty() => {
                format!("{}/{}", build.repository.owner_name, build.repository.name)
            }
            _ => return Err(SourceError::MissingHeader(SLUG_HEADER)),
        };
        debug!(slug = %slug, state = %build.state, "travis build event");

        let line = if build.state == "started" {
            format!(
                "{} started a build for {} with the commit '{}' on branch {}",
                paint(Color::LightGrey, &build.author_name),
                paint(Color::LightBlue, &slug),
                first_line(&build.message),
                build.branch
            )
        } else {
            format!(
                "{}'s build for {} finished after {}sec and {}",
                paint(Color::LightGrey, &build.author_name),
                paint(Color::LightBlue, &slug),
                build.duration.unwrap_or_default(),
                build_status(&build.status_message)
            )
        };

        Ok(vec![Notification {
            channels: BTreeSet::from([self.default_channel.clone()]),
            lines: vec![line],
        }])
    }
}

/// Verb phrase for a Travis `status_message`.
fn build_status(status: &str) -> String {
    match status {
        "Pending" => format!("is {}", paint(Color::Purple, "pending")),
        "Passed" => format!("has {}", paint(Color::Green, "passed")),
        "Fixed" => format!("is {}", paint(Color::Green, "fixed")),
        "Broken" => format!("is {}", paint(Color::Red, "broken")),
        "Failed" => format!("has {}", paint(Color::Red, "failed")),
        "Still Failing" => format!("is {}", paint(Color::Red, "still failing")),
        "Canceled" => format!("was {}", paint(Color::Red, "canceled")),
        "Errored" => format!("has {}", paint(Color::Pink, "errored")),
        other => format!("ended with status {other:?}"),
    }
}
