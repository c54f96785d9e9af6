//! Server-side history engine: admits a client into a session, accepts
//! its changesets into the shared history (transforming them against
//! whatever was integrated concurrently), and answers "what do you
//! still need to download" queries. `compact_history` is the only
//! thing that ever shrinks `sync_history`.

#[cfg(test)]
use super::ClientFile;
use super::{ClientType, HistoryEntry, HistoryState};
use crate::changeset::codec::{encode_changeset, parse_changeset};
use crate::changeset::transform::{transform_remote, HistoryEntry as TransformEntry, RemoteChangeset};
use crate::changeset::Changeset;
use crate::error::{BootstrapError, ChangesetError};
use crate::sync::{DownloadCursor, UploadProgress};
use rand::Rng;

/// Admits `ident` into a new session. `ident` must already name a row
/// in `client_files` (idents are assigned by the ALLOC step, upstream
/// of bootstrap); this function only validates and resumes one.
pub fn bootstrap_client_session(
    state: &mut HistoryState,
    ident: u64,
    client_type: ClientType,
    download_progress: DownloadCursor,
    now: u64,
) -> Result<(UploadProgress, u64), BootstrapError> {
    let idx = ident as usize;
    if idx == 0 || idx >= state.client_files.len() {
        return Err(BootstrapError::BadClientFileIdent);
    }
    let latest = state.latest_version();
    let history_base = state.history_base_version;
    let cf = &mut state.client_files[idx];

    if cf.is_expired() {
        return Err(BootstrapError::ClientFileExpired);
    }
    if cf.last_seen_timestamp != 0 && cf.client_type != client_type {
        return Err(BootstrapError::BadClientType);
    }
    if download_progress.server_version < history_base || download_progress.server_version > latest {
        return Err(BootstrapError::BadDownloadServerVersion);
    }
    if download_progress.last_integrated_client_version > cf.last_client_version_integrated {
        return Err(BootstrapError::BadDownloadClientVersion);
    }

    cf.client_type = client_type;
    cf.last_seen_timestamp = now;
    cf.locked_server_version = latest;

    let upload_progress = UploadProgress {
        client_version: cf.last_client_version_integrated,
        last_integrated_server_version: download_progress.server_version,
    };
    Ok((upload_progress, cf.locked_server_version))
}

/// One client's batch of changesets to integrate, in client-version
/// order.
pub struct ClientUpload {
    pub file_ident: u64,
    pub changesets: Vec<Changeset>,
    pub timestamps: Vec<u64>,
}

pub struct ClientUploadResult {
    pub file_ident: u64,
    pub result: Result<UploadProgress, ChangesetError>,
}

/// Transforms `upload`'s changesets against every `sync_history` entry
/// accepted since the client's `reciprocal_history_base_version`, not
/// mutating `state` — the pure half of integration, safe to run off
/// the history-owning thread.
fn transform_upload(state: &HistoryState, upload: &ClientUpload) -> Result<Vec<Changeset>, ChangesetError> {
    for cs in &upload.changesets {
        if cs.origin_file_ident != upload.file_ident {
            return Err(ChangesetError::BadOriginFileIdent {
                found: cs.origin_file_ident,
                expected: upload.file_ident,
            });
        }
    }
    let local: Vec<TransformEntry> = state
        .sync_history
        .iter()
        .filter(|e| e.origin_file_ident != upload.file_ident)
        .map(|e| TransformEntry { changeset: e.changeset.clone(), timestamp: e.timestamp })
        .collect();
    let mut remote: Vec<RemoteChangeset> = upload
        .changesets
        .iter()
        .cloned()
        .zip(upload.timestamps.iter().copied())
        .map(|(changeset, timestamp)| RemoteChangeset { changeset, timestamp })
        .collect();
    transform_remote(&local, &mut remote)?;
    Ok(remote.into_iter().map(|r| r.changeset).collect())
}

/// Integrates every client's upload that transforms cleanly, appending
/// accepted changesets to `sync_history` in a randomized per-round
/// order (so no single client is always first or last across many
/// rounds) and isolating a transform failure to just the offending
/// client's file — every other upload in the batch still integrates.
pub fn integrate_client_changesets(
    state: &mut HistoryState,
    mut uploads: Vec<ClientUpload>,
    now: u64,
    rng: &mut impl Rng,
) -> Vec<ClientUploadResult> {
    // Fisher-Yates shuffle of attempt order.
    for i in (1..uploads.len()).rev() {
        let j = rng.gen_range(0..=i);
        uploads.swap(i, j);
    }

    let mut results = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let outcome = transform_upload(state, &upload).map(|transformed| {
            let idx = upload.file_ident as usize;
            for (cs, ts) in transformed.into_iter().zip(upload.timestamps.iter().copied()) {
                let mut buf = Vec::new();
                encode_changeset(&cs, &mut buf);
                let prev_total = state.sync_history.last().map(|e| e.cumulative_byte_size).unwrap_or(0);
                state.sync_history.push(HistoryEntry {
                    salt: state.client_files[idx].ident_salt,
                    origin_file_ident: upload.file_ident,
                    client_version: state.client_files[idx].last_client_version_integrated + 1,
                    timestamp: ts,
                    changeset: cs,
                    cumulative_byte_size: prev_total + buf.len() as u64,
                });
                state.client_files[idx].last_client_version_integrated += 1;
            }
            state.client_files[idx].last_seen_timestamp = now;
            UploadProgress {
                client_version: state.client_files[idx].last_client_version_integrated,
                last_integrated_server_version: state.latest_version(),
            }
        });
        results.push(ClientUploadResult { file_ident: upload.file_ident, result: outcome });
    }
    results
}

/// One page of `sync_history` to send a client, from `from` (exclusive)
/// through at most `to` (inclusive), bounded by `byte_limit`.
pub struct DownloadInfo {
    pub entries: Vec<HistoryEntry>,
    pub reached_version: u64,
}

/// Selects the slice of history a client still needs: its own
/// changesets are skipped (it already has them), as are already-empty
/// changesets left behind by a losing OT transform, and the response
/// stops early once `byte_limit` would be exceeded.
pub fn fetch_download_info(state: &HistoryState, file_ident: u64, from: u64, to: u64, byte_limit: u64) -> DownloadInfo {
    let base = state.history_base_version;
    let start = from.saturating_sub(base) as usize;
    let end = (to.saturating_sub(base) as usize).min(state.sync_history.len());

    let mut entries = Vec::new();
    let mut reached = from;
    let mut baseline = if start > 0 { state.sync_history[start - 1].cumulative_byte_size } else { 0 };

    for entry in &state.sync_history[start.min(end)..end] {
        if entry.origin_file_ident == file_ident || entry.changeset.is_empty() {
            reached += 1;
            continue;
        }
        if entry.cumulative_byte_size - baseline > byte_limit && !entries.is_empty() {
            break;
        }
        baseline = entry.cumulative_byte_size;
        entries.push(entry.clone());
        reached += 1;
    }
    DownloadInfo { entries, reached_version: reached }
}

/// Expires peers that haven't been seen, then advances
/// `compacted_until_version` to the minimum reciprocal-history base
/// version among the peers still alive (never past index 0's sentinel
/// entry), and rewrites the retained changesets through the codec so a
/// corrupt in-memory entry would be caught here rather than on next
/// download. Runs at most once per `min_interval`, jittered by up to
/// 50% so many realms on one server don't compact in lockstep.
pub fn compact_history(state: &mut HistoryState, now: u64, history_ttl: u64, min_interval: u64, rng: &mut impl Rng) -> Result<(), ChangesetError> {
    let elapsed = now.saturating_sub(state.last_compaction_timestamp);
    let jittered_interval = (min_interval as f64 * (0.5 + rng.gen::<f64>() * 1.0)) as u64;
    if state.last_compaction_timestamp != 0 && elapsed < jittered_interval {
        return Ok(());
    }

    for (idx, cf) in state.client_files.iter_mut().enumerate() {
        if idx < 2 {
            continue;
        }
        if !cf.is_expired() && now.saturating_sub(cf.last_seen_timestamp) > history_ttl {
            cf.last_seen_timestamp = 0;
            cf.reciprocal_history.clear();
        }
    }

    let min_base = state
        .client_files
        .iter()
        .filter(|cf| !cf.is_expired())
        .map(|cf| cf.reciprocal_history_base_version)
        .min()
        .unwrap_or(state.history_base_version);
    let new_compacted = min_base.max(state.compacted_until_version).min(state.latest_version());

    let drop_count = new_compacted.saturating_sub(state.history_base_version) as usize;
    if drop_count > 0 {
        for entry in state.sync_history.iter().take(drop_count) {
            let mut buf = Vec::new();
            encode_changeset(&entry.changeset, &mut buf);
            parse_changeset(&buf)?;
        }
        state.sync_history.drain(0..drop_count);
        state.history_base_version += drop_count as u64;
    }
    state.compacted_until_version = new_compacted;
    state.last_compaction_timestamp = now;
    Ok(())
}
