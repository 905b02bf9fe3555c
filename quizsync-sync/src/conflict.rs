//! Conflict detection and presentation
//!
//! A conflict exists when the local and remote snapshots disagree and the
//! local one has real content. Nothing here decides the outcome; the user
//! picks a side.

use serde::{Deserialize, Serialize};

use quizsync_core::{SnapshotSummary, UserData};

/// Which side the user kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}

/// A detected divergence between the two snapshots, waiting for a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCandidate {
    pub local: UserData,
    pub remote: UserData,
    pub local_checksum: String,
    pub remote_checksum: String,
    pub local_last_modified: Option<i64>,
    pub remote_last_modified: i64,
}

impl ConflictCandidate {
    pub fn summary(&self) -> ConflictSummary {
        ConflictSummary {
            local: self.local.summary(),
            remote: self.remote.summary(),
            local_last_modified: self.local_last_modified,
            remote_last_modified: self.remote_last_modified,
        }
    }
}

/// What the conflict dialog shows for a human comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
    pub local: SnapshotSummary,
    pub remote: SnapshotSummary,
    pub local_last_modified: Option<i64>,
    pub remote_last_modified: i64,
}

impl ConflictSummary {
    /// Which side was modified more recently, if the local stamp is known.
    pub fn newer_side(&self) -> Option<Resolution> {
        let local = self.local_last_modified?;
        if local >= self.remote_last_modified {
            Some(Resolution::KeepLocal)
        } else {
            Some(Resolution::KeepRemote)
        }
    }
}

/// Outcome of comparing a local snapshot against the remote envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    /// Nothing stored remotely yet
    RemoteMissing,
    /// Checksums match
    Equal,
    /// Checksums differ but local has no content worth keeping
    AdoptRemote,
    /// Checksums differ and both sides have content
    Conflict,
}

/// Decide what a checking sync should do.
pub fn compare(
    local: &UserData,
    local_checksum: &str,
    remote_checksum: Option<&str>,
) -> Comparison {
    match remote_checksum {
        None => Comparison::RemoteMissing,
        Some(remote) if remote == local_checksum => Comparison::Equal,
        Some(_) if !local.has_content() => Comparison::AdoptRemote,
        Some(_) => Comparison::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_outcomes() {
        let empty = UserData::new();
        let mut full = UserData::new();
        full.add_subject("Art", None, None);

        assert_eq!(compare(&full, "abc", None), Comparison::RemoteMissing);
        assert_eq!(compare(&full, "abc", Some("abc")), Comparison::Equal);
        assert_eq!(compare(&empty, "abc", Some("xyz")), Comparison::AdoptRemote);
        assert_eq!(compare(&full, "abc", Some("xyz")), Comparison::Conflict);
    }

    #[test]
    fn test_only_bookmarks_is_not_a_conflict() {
        let mut local = UserData::new();
        local.toggle_bookmark("q1");
        assert_eq!(compare(&local, "a", Some("b")), Comparison::AdoptRemote);
    }

    #[test]
    fn test_summary_and_newer_side() {
        let mut local = UserData::new();
        local.add_subject("A", None, None);
        let mut remote = UserData::new();
        remote.add_subject("B", None, None);
        remote.add_subject("C", None, None);

        let candidate = ConflictCandidate {
            local,
            remote,
            local_checksum: "l".into(),
            remote_checksum: "r".into(),
            local_last_modified: Some(100),
            remote_last_modified: 200,
        };
        let summary = candidate.summary();
        assert_eq!(summary.local.subjects, 1);
        assert_eq!(summary.remote.subjects, 2);
        assert_eq!(summary.newer_side(), Some(Resolution::KeepRemote));

        let unknown = ConflictSummary {
            local_last_modified: None,
            ..summary
        };
        assert_eq!(unknown.newer_side(), None);
    }
}
