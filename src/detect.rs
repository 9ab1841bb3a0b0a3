//! Version change detection
//!
//! Decides whether a freshly polled commit/release/tag is worth a notification.
//! Tiers are checked in priority order (release, then tag, then commit) and the
//! first match wins. Detection is pure: no I/O, no clock.

use serde::{Deserialize, Serialize};

use crate::github::{CommitInfo, ReleaseInfo, TagInfo};
use crate::state::SyncState;

/// Kind of detected version change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Release,
    Tag,
    Commit,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Release => "release",
            UpdateKind::Tag => "tag",
            UpdateKind::Commit => "commit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "release" => Some(UpdateKind::Release),
            "tag" => Some(UpdateKind::Tag),
            "commit" => Some(UpdateKind::Commit),
            _ => None,
        }
    }
}

/// The single most significant change found by one poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionUpdate {
    pub kind: UpdateKind,
    /// Display value: release/tag name as published, or abbreviated commit sha
    pub value: String,
    pub date: Option<String>,
    pub notes: Option<String>,
    /// Not yet acknowledged by the user
    pub is_new: bool,
}

impl VersionUpdate {
    /// New releases and tags raise the sticky notification and get a history row.
    /// Plain commits never do.
    pub fn is_notifiable(&self) -> bool {
        self.is_new && matches!(self.kind, UpdateKind::Release | UpdateKind::Tag)
    }
}

/// Strip one leading `v` or `V` for comparison purposes
pub fn normalize_version(version: &str) -> &str {
    version
        .strip_prefix(|c: char| c == 'v' || c == 'V')
        .unwrap_or(version)
}

fn normalized(version: Option<&str>) -> Option<&str> {
    version.map(normalize_version)
}

/// Pick the notification-worthy update, if any
pub fn detect(
    current: Option<&SyncState>,
    release: Option<&ReleaseInfo>,
    tag: Option<&TagInfo>,
    commit: Option<&CommitInfo>,
) -> Option<VersionUpdate> {
    let acknowledged = normalized(current.and_then(|s| s.acknowledged_release.as_deref()));

    if let Some(release) = release {
        if Some(normalize_version(&release.tag)) != acknowledged {
            return Some(VersionUpdate {
                kind: UpdateKind::Release,
                value: release.tag.clone(),
                date: Some(release.date.clone()),
                notes: release.notes.clone(),
                is_new: true,
            });
        }
    }

    // Tags only count for repositories that publish no releases
    if let (Some(tag), None) = (tag, release) {
        let last_tag = current.and_then(|s| s.last_tag.as_deref());
        if Some(normalize_version(&tag.tag)) != acknowledged && Some(tag.tag.as_str()) != last_tag {
            return Some(VersionUpdate {
                kind: UpdateKind::Tag,
                value: tag.tag.clone(),
                date: Some(tag.date.clone()),
                notes: None,
                is_new: true,
            });
        }
    }

    if let Some(commit) = commit {
        let last_sha = current.and_then(|s| s.last_commit_sha.as_deref());
        if Some(commit.sha.as_str()) != last_sha {
            return Some(VersionUpdate {
                kind: UpdateKind::Commit,
                value: commit.short_sha().to_string(),
                date: Some(commit.date.clone()),
                notes: None,
                // A first-ever sync is history, not news
                is_new: last_sha.is_some(),
            });
        }
    }

    None
}

/// Whether anything at all changed since the last sync
pub fn has_updates(
    current: Option<&SyncState>,
    commit: Option<&CommitInfo>,
    release: Option<&ReleaseInfo>,
    tag: Option<&TagInfo>,
) -> bool {
    let Some(current) = current else {
        return true;
    };

    if let Some(commit) = commit {
        if current.last_commit_sha.as_deref() != Some(commit.sha.as_str()) {
            return true;
        }
    }

    if let Some(release) = release {
        if current.last_release_tag.as_deref() != Some(release.tag.as_str()) {
            return true;
        }
    }

    if let Some(tag) = tag {
        if current.last_tag.as_deref() != Some(tag.tag.as_str()) {
            return true;
        }
    }

    false
}
