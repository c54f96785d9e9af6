//! Client-side counterpart to `server.rs`: the same changeset-history
//! bookkeeping from a single realm's perspective, seen from "below" the
//! server instead of managing a table of peers. Not named in the
//! distilled module list but present in `original_source` as
//! `ClientHistory`; carried over because a client process needs this
//! logic too, it just never talks to more than one upstream.

use crate::changeset::transform::{transform_remote, HistoryEntry as TransformEntry, RemoteChangeset};
use crate::changeset::Changeset;
use crate::error::ChangesetError;
use crate::sync::{DownloadCursor, UploadProgress};

/// One changeset this client has produced locally but not yet had
/// acknowledged by the server.
#[derive(Clone, Debug)]
pub struct PendingUpload {
    pub client_version: u64,
    pub timestamp: u64,
    pub changeset: Changeset,
}

#[derive(Clone, Debug, Default)]
pub struct ClientHistory {
    pub file_ident: u64,
    pub progress: UploadProgress,
    pub pending: Vec<PendingUpload>,
    /// Set by a client reset: instructions to splice ahead of the first
    /// replayed local changeset so local-only data survives the reset
    /// instead of being silently discarded.
    pub reset_adjustments: Vec<Changeset>,
}

impl ClientHistory {
    pub fn new(file_ident: u64) -> ClientHistory {
        ClientHistory { file_ident, ..ClientHistory::default() }
    }

    /// Records a local changeset as pending upload.
    pub fn add_local_changeset(&mut self, changeset: Changeset, timestamp: u64) {
        let client_version = self.pending.last().map(|p| p.client_version + 1).unwrap_or(self.progress.client_version + 1);
        self.pending.push(PendingUpload { client_version, timestamp, changeset });
    }

    /// Called after a client reset invalidates everything not yet
    /// acknowledged by the server: `local_only` is re-expressed as
    /// adjustment changesets to replay on top of the fresh baseline,
    /// rather than being dropped outright.
    pub fn set_client_reset_adjustments(&mut self, local_only: Vec<Changeset>) {
        self.reset_adjustments = local_only;
        self.pending.clear();
    }

    /// The upload cursor to send with the next UPLOAD message: the
    /// client version just past the last one the server has already
    /// integrated, so re-sending never duplicates an accepted entry.
    pub fn get_upload_anchor(&self) -> u64 {
        self.progress.client_version
    }

    /// Transforms incoming server changesets against this client's own
    /// pending (not-yet-acknowledged) local changesets, then advances
    /// the download cursor. Mirrors `server::integrate_client_changesets`
    /// but against a single pending list instead of a peer table.
    pub fn integrate_server_changesets(
        &mut self,
        remote: Vec<Changeset>,
        remote_timestamps: Vec<u64>,
        download_progress: DownloadCursor,
    ) -> Result<Vec<Changeset>, ChangesetError> {
        let local: Vec<TransformEntry> = self
            .pending
            .iter()
            .map(|p| TransformEntry { changeset: p.changeset.clone(), timestamp: p.timestamp })
            .collect();
        let mut remote_entries: Vec<RemoteChangeset> = remote
            .into_iter()
            .zip(remote_timestamps.into_iter())
            .map(|(changeset, timestamp)| RemoteChangeset { changeset, timestamp })
            .collect();
        transform_remote(&local, &mut remote_entries)?;

        self.progress.last_integrated_server_version = download_progress.server_version;
        self.pending.retain(|p| p.client_version > download_progress.last_integrated_client_version);
        if download_progress.last_integrated_client_version > self.progress.client_version {
            self.progress.client_version = download_progress.last_integrated_client_version;
        }

        Ok(remote_entries.into_iter().map(|r| r.changeset).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::{Instruction, Payload, PrimaryKeySelector};

    fn update(origin: u64, value: &str) -> Changeset {
        let mut cs = Changeset::new(origin);
        cs.instructions.push(Instruction::UpdateObject {
            table: "Person".into(),
            key: PrimaryKeySelector::RowIndex(0),
            column: "name".into(),
            value: Payload::String(value.into()),
        });
        cs
    }

    #[test]
    fn local_changesets_get_increasing_client_versions() {
        let mut h = ClientHistory::new(1);
        h.add_local_changeset(update(1, "a"), 1);
        h.add_local_changeset(update(1, "b"), 2);
        assert_eq!(h.pending[0].client_version, 1);
        assert_eq!(h.pending[1].client_version, 2);
    }

    #[test]
    fn acknowledged_pending_entries_are_dropped() {
        let mut h = ClientHistory::new(1);
        h.add_local_changeset(update(1, "a"), 1);
        h.add_local_changeset(update(1, "b"), 2);
        let progress = DownloadCursor { server_version: 5, last_integrated_client_version: 1 };
        h.integrate_server_changesets(vec![], vec![], progress).unwrap();
        assert_eq!(h.pending.len(), 1);
        assert_eq!(h.pending[0].client_version, 2);
    }

    #[test]
    fn reset_adjustments_clear_pending_and_record_local_only_work() {
        let mut h = ClientHistory::new(1);
        h.add_local_changeset(update(1, "a"), 1);
        h.set_client_reset_adjustments(vec![update(1, "a")]);
        assert!(h.pending.is_empty());
        assert_eq!(h.reset_adjustments.len(), 1);
    }

    #[test]
    fn remote_update_is_transformed_against_still_pending_local_writes() {
        let mut h = ClientHistory::new(1);
        h.add_local_changeset(update(1, "local"), 10);
        let remote = vec![update(2, "remote")];
        let out = h.integrate_server_changesets(remote, vec![5], DownloadCursor::default()).unwrap();
        assert!(out[0].instructions.is_empty(), "older remote write loses to the still-pending local write");
    }
}
