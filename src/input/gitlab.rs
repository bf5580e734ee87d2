//! GitLab system/project hooks.
//!
//! The event kind comes from the `X-Gitlab-Event` header. Pipeline and job
//! hooks only render terminal states; everything still in progress is
//! dropped.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::format::{first_line, paint, short_sha, Color};
use super::{Notification, SourceError, WebhookRequest};
use crate::routing::ChannelMapping;

/// Header carrying the event kind.
pub const EVENT_HEADER: &str = "X-Gitlab-Event";

/// Commits listed per push when no valid limit is configured.
pub const DEFAULT_COMMIT_LIMIT: usize = 3;

/// Largest accepted `commit_limit`.
pub const MAX_COMMIT_LIMIT: usize = 20;

/// Sentinel SHA GitLab sends for a ref that does not exist on one side.
const NULL_COMMIT: &str = "0000000000000000000000000000000000000000";

/// Pipeline states worth a notification.
const PIPELINE_STATES: &[&str] = &["success", "failed", "canceled"];

/// Job states worth a notification.
const JOB_STATES: &[&str] = &["success", "failed"];

/// Event kinds understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitlabEvent {
    /// Branch push.
    Push,
    /// Tag push.
    TagPush,
    /// Issue opened, updated, closed or reopened.
    Issue,
    /// Merge request lifecycle change.
    MergeRequest,
    /// Pipeline status change.
    Pipeline,
    /// Job status change.
    Job,
}

impl GitlabEvent {
    /// Map an `X-Gitlab-Event` header value to a kind.
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "Push Hook" | "Push Event" => Some(Self::Push),
            "Tag Push Hook" | "Tag Push Event" => Some(Self::TagPush),
            "Issue Hook" | "Issue Event" => Some(Self::Issue),
            "Merge Request Hook" | "Merge Request Event" => Some(Self::MergeRequest),
            "Pipeline Hook" | "Pipeline Event" => Some(Self::Pipeline),
            "Job Hook" | "Job Event" | "Build Hook" => Some(Self::Job),
            _ => None,
        }
    }
}

/// Clamp a configured commit limit into `1..=20`, falling back to the default.
pub fn effective_commit_limit(configured: Option<i64>) -> usize {
    match configured {
        None => DEFAULT_COMMIT_LIMIT,
        Some(limit) => match usize::try_from(limit) {
            Ok(limit) if (1..=MAX_COMMIT_LIMIT).contains(&limit) => limit,
            _ => {
                warn!(
                    commit_limit = limit,
                    fallback = DEFAULT_COMMIT_LIMIT,
                    "commit_limit out of range, using default"
                );
                DEFAULT_COMMIT_LIMIT
            }
        },
    }
}

/// Renders GitLab hooks.
#[derive(Debug, Clone)]
pub struct GitlabSource {
    mapping: ChannelMapping,
    commit_limit: usize,
}

impl GitlabSource {
    /// Create a source; an out-of-range `commit_limit` is logged and replaced.
    pub fn new(mapping: ChannelMapping, commit_limit: Option<i64>) -> Self {
        Self {
            mapping,
            commit_limit: effective_commit_limit(commit_limit),
        }
    }

    /// Commits listed per push.
    pub fn commit_limit(&self) -> usize {
        self.commit_limit
    }

    /// Every channel the mapping can produce.
    pub fn channel_list(&self) -> BTreeSet<String> {
        self.mapping.channel_list()
    }

    /// Render one hook request.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::MissingHeader`] without an event header and
    /// [`SourceError::Decode`] when the body does not match the event kind.
    pub fn render(&self, request: &WebhookRequest) -> Result<Vec<Notification>, SourceError> {
        let header = request
            .header(EVENT_HEADER)
            .ok_or(SourceError::MissingHeader(EVENT_HEADER))?;
        debug!(event_type = header, "got a request for the gitlab module");

        let Some(event) = GitlabEvent::from_header(header) else {
            warn!(event_type = header, "unsupported gitlab event type");
            return Ok(Vec::new());
        };
        self.render_event(event, &request.body)
    }

    /// Render a decoded event kind from a raw body.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Decode`] when the body does not match `event`.
    pub fn render_event(
        &self,
        event: GitlabEvent,
        body: &[u8],
    ) -> Result<Vec<Notification>, SourceError> {
        let rendered = match event {
            GitlabEvent::Push => {
                let push: PushEvent = serde_json::from_slice(body)?;
                Some((push.project.path_with_namespace.clone(), self.push_lines(&push)))
            }
            GitlabEvent::TagPush => {
                let push: PushEvent = serde_json::from_slice(body)?;
                Some((push.project.path_with_namespace.clone(), tag_lines(&push)))
            }
            GitlabEvent::Issue => {
                let issue: IssueEvent = serde_json::from_slice(body)?;
                let line = object_line(
                    &issue.project,
                    &issue.user,
                    "issue",
                    &issue.object_attributes,
                );
                Some((issue.project.path_with_namespace, vec![line]))
            }
            GitlabEvent::MergeRequest => {
                let merge: IssueEvent = serde_json::from_slice(body)?;
                let line = object_line(
                    &merge.project,
                    &merge.user,
                    "merge request",
                    &merge.object_attributes,
                );
                Some((merge.project.path_with_namespace, vec![line]))
            }
            GitlabEvent::Pipeline => {
                let pipeline: PipelineEvent = serde_json::from_slice(body)?;
                pipeline_line(&pipeline)
                    .map(|line| (pipeline.project.path_with_namespace, vec![line]))
            }
            GitlabEvent::Job => {
                let job: JobEvent = serde_json::from_slice(body)?;
                job_line(&job).map(|line| (job_routing_key(&job.repository), vec![line]))
            }
        };

        let Some((routing_key, lines)) = rendered else {
            return Ok(Vec::new());
        };
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let channels = self.mapping.resolve(&routing_key);
        info!(
            event_type = ?event,
            routing_key = %routing_key,
            channels = channels.len(),
            lines = lines.len(),
            "rendered gitlab event"
        );
        Ok(vec![Notification { channels, lines }])
    }

    fn push_lines(&self, push: &PushEvent) -> Vec<String> {
        let project = paint(Color::LightBlue, &push.project.name);
        let branch = push.git_ref.strip_prefix("refs/heads/").unwrap_or(&push.git_ref);
        let branch_colored = paint(Color::Brown, branch);

        if push.after == NULL_COMMIT {
            return vec![format!(
                "[{project}] {} deleted the branch {branch_colored}",
                push.user_name
            )];
        }

        let mut lines = Vec::new();
        let created = push.before == NULL_COMMIT;
        if created {
            lines.push(format!(
                "[{project}] {} created the branch {branch_colored}",
                push.user_name
            ));
        }

        if push.total_commits_count == 0 {
            return lines;
        }

        // A new branch has no base to compare against.
        let url = if created {
            format!("{}/commits/{branch}", push.project.web_url)
        } else {
            format!(
                "{}/compare/{}...{}",
                push.project.web_url,
                short_sha(&push.before),
                short_sha(&push.after)
            )
        };
        lines.push(format!(
            "[{project}] {} pushed {} commits to {branch_colored} {url}",
            push.user_name, push.total_commits_count
        ));

        lines.extend(push.commits.iter().take(self.commit_limit).map(commit_line));

        if push.total_commits_count > self.commit_limit {
            lines.push(format!(
                "and {} more commits.",
                push.total_commits_count.saturating_sub(self.commit_limit)
            ));
        }
        lines
    }
}

fn commit_line(commit: &Commit) -> String {
    format!(
        "{} ({}|{}|{}) {}: {}",
        paint(Color::LightGrey, short_sha(&commit.id)),
        paint(Color::Green, format!("+{}", commit.added.len())),
        paint(Color::Yellow, format!("±{}", commit.modified.len())),
        paint(Color::Red, format!("-{}", commit.removed.len())),
        paint(Color::Purple, &commit.author.name),
        first_line(&commit.message)
    )
}

fn tag_lines(push: &PushEvent) -> Vec<String> {
    let project = paint(Color::LightBlue, &push.project.name);
    let tag = push.git_ref.strip_prefix("refs/tags/").unwrap_or(&push.git_ref);
    let line = if push.after == NULL_COMMIT {
        format!(
            "[{project}] {} deleted the tag {}",
            push.user_name,
            paint(Color::Brown, tag)
        )
    } else {
        format!(
            "[{project}] {} pushed the tag {} {}/-/tags/{tag}",
            push.user_name,
            paint(Color::Brown, tag),
            push.project.web_url
        )
    };
    vec![line]
}

fn object_line(project: &Project, user: &User, noun: &str, object: &ObjectAttributes) -> String {
    format!(
        "[{}] {} {} {noun} {}: {} {}",
        paint(Color::LightBlue, &project.name),
        user.name,
        hook_action(&object.action),
        paint(Color::Yellow, format!("#{}", object.iid)),
        object.title,
        object.url
    )
}

/// Past-tense verb for an issue or merge request action.
pub fn hook_action(action: &str) -> &str {
    match action {
        "open" => "opened",
        "update" => "updated",
        "close" => "closed",
        "reopen" => "reopened",
        "merge" => "merged",
        "approved" | "approve" => "approved",
        "" => "updated",
        other => other,
    }
}

/// Colored phrase describing a pipeline or job status.
pub fn status_phrase(status: &str) -> String {
    match status {
        "pending" => format!("is {}", paint(Color::LightGrey, "pending")),
        "created" => format!("was {}", paint(Color::LightGrey, "created")),
        "running" => format!("is {}", paint(Color::Orange, "running")),
        "failed" => format!("has {}", paint(Color::Red, "failed")),
        "success" => format!("has {}", paint(Color::Green, "succeeded")),
        "canceled" => format!("was {}", paint(Color::Grey, "canceled")),
        other => format!("is {other}"),
    }
}

fn pipeline_line(event: &PipelineEvent) -> Option<String> {
    let pipeline = &event.object_attributes;
    if !PIPELINE_STATES.contains(&pipeline.status.as_str()) {
        debug!(status = %pipeline.status, "skipping noisy pipeline event");
        return None;
    }
    Some(format!(
        "[{}] Pipeline for commit {} {} in {} seconds {}/pipelines/{}",
        paint(Color::LightBlue, &event.project.name),
        short_sha(&pipeline.sha),
        status_phrase(&pipeline.status),
        seconds(pipeline.duration),
        event.project.web_url,
        pipeline.id
    ))
}

fn job_line(job: &JobEvent) -> Option<String> {
    if !JOB_STATES.contains(&job.build_status.as_str()) {
        debug!(status = %job.build_status, "skipping noisy job event");
        return None;
    }
    Some(format!(
        "[{}] Job {} for commit {} {} in {} seconds {}/-/jobs/{}",
        paint(Color::LightBlue, &job.repository.name),
        paint(Color::Yellow, &job.build_name),
        short_sha(&job.sha),
        status_phrase(&job.build_status),
        seconds(job.build_duration),
        job.repository.homepage,
        job.build_id
    ))
}

fn seconds(duration: Option<f64>) -> String {
    // Negative or NaN durations clamp to zero.
    format!("{:.0}", duration.unwrap_or_default().max(0.0))
}

/// `group/project` path of a job's repository.
///
/// Job hooks carry no `path_with_namespace`, so the path is taken from the
/// homepage URL, or from the SSH clone URL (`git@host:group/project.git`).
pub fn job_routing_key(repository: &Repository) -> String {
    if let Ok(url) = url::Url::parse(&repository.homepage) {
        let path = url.path().trim_matches('/');
        if !path.is_empty() {
            return path.to_owned();
        }
    }
    repository
        .url
        .split_once(':')
        .map(|(_, path)| path)
        .unwrap_or(&repository.url)
        .trim_start_matches('/')
        .trim_end_matches(".git")
        .to_owned()
}

// Payload shapes. Every field defaults so sparse test hooks still decode.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Project {
    name: String,
    path_with_namespace: String,
    web_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct User {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Author {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Commit {
    id: String,
    message: String,
    added: Vec<String>,
    modified: Vec<String>,
    removed: Vec<String>,
    author: Author,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PushEvent {
    user_name: String,
    before: String,
    after: String,
    #[serde(rename = "ref")]
    git_ref: String,
    project: Project,
    commits: Vec<Commit>,
    total_commits_count: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectAttributes {
    iid: u64,
    action: String,
    title: String,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IssueEvent {
    user: User,
    project: Project,
    object_attributes: ObjectAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Pipeline {
    id: u64,
    sha: String,
    status: String,
    duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PipelineEvent {
    object_attributes: Pipeline,
    project: Project,
}

/// Repository block of a job hook.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    /// Project name.
    pub name: String,
    /// Web URL of the project.
    pub homepage: String,
    /// SSH clone URL.
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobEvent {
    build_id: u64,
    build_name: String,
    build_status: String,
    build_duration: Option<f64>,
    sha: String,
    repository: Repository,
}
