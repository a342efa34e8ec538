//! Reconciliation engine and caller-facing sync service.
//!
//! One run diffs local store state, remote state, and the manifest, then
//! applies the minimal set of uploads and downloads. Per-entity failures
//! are recorded and the run continues; only auth failures, an unreachable
//! server on connect, and local store corruption abort a run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::credentials::CredentialStore;
use crate::db::{
    entries_by_period, AttachmentRepository, Database, EntryRepository, JournalRepository,
    ManifestStore, SqliteAttachmentRepository, SqliteEntryRepository, SqliteJournalRepository,
    SqliteManifestStore, SqliteStatusStore, SqliteSyncConfigStore, StatusStore, SyncConfigStore,
};
use crate::error::{Error, Result};
use crate::models::{
    Attachment, AttachmentId, EntityKey, Entry, Journal, JournalId, ManifestEntry, Period,
    SyncConfig, SyncConfigId, SyncState, SyncStatus,
};
use crate::transport::{Transport, TransportError, WebDavConfig, WebDavTransport};

use super::documents::{
    bundle_path, file_path, fingerprint, journal_fingerprint, journals_doc_path, EntryBundle,
    EntryRecord, JournalsDocument, REMOTE_ROOT,
};
use super::locks::{CancelFlag, OperationLocks};

/// Observer invoked on every status transition of a run.
pub type StatusCallback = Box<dyn Fn(&SyncStatus) + Send + Sync>;

/// How conflicting edits of the same entity are resolved.
///
/// Only last-write-wins is implemented; the enum is the seam where richer
/// strategies (user choice, three-way merge) would slot in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The side with the later `updated_at` wins; ties keep local.
    #[default]
    LastWriteWins,
}

impl ConflictPolicy {
    /// Whether the local side wins a conflict, given both sides' latest
    /// modification timestamps.
    #[must_use]
    pub const fn local_wins(self, local_at: i64, remote_at: i64) -> bool {
        match self {
            Self::LastWriteWins => local_at >= remote_at,
        }
    }
}

/// Builds a [`Transport`] for a configuration at the start of a run.
pub trait TransportFactory: Send + Sync {
    /// Connect to the config's server with the given credential.
    fn connect(&self, config: &SyncConfig, credential: &str) -> Result<Arc<dyn Transport>>;
}

/// Factory producing [`WebDavTransport`] instances.
pub struct WebDavTransportFactory {
    timeout: Duration,
}

impl WebDavTransportFactory {
    /// Factory with the given per-operation network timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WebDavTransportFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl TransportFactory for WebDavTransportFactory {
    fn connect(&self, config: &SyncConfig, credential: &str) -> Result<Arc<dyn Transport>> {
        let transport = WebDavTransport::new(
            WebDavConfig::new(&config.server_url, &config.username, credential)
                .with_timeout(self.timeout),
        )?;
        Ok(Arc::new(transport))
    }
}

/// The store seams one engine run reads and writes.
pub struct SyncStores {
    /// Sync configuration store.
    pub configs: Arc<dyn SyncConfigStore>,
    /// Manifest store.
    pub manifests: Arc<dyn ManifestStore>,
    /// Last-terminal-status store.
    pub statuses: Arc<dyn StatusStore>,
    /// Journal repository.
    pub journals: Arc<dyn JournalRepository>,
    /// Entry repository.
    pub entries: Arc<dyn EntryRepository>,
    /// Attachment repository.
    pub attachments: Arc<dyn AttachmentRepository>,
}

impl SyncStores {
    /// SQLite-backed stores over a shared database.
    #[must_use]
    pub fn sqlite(db: &Arc<Database>) -> Self {
        Self {
            configs: Arc::new(SqliteSyncConfigStore::new(Arc::clone(db))),
            manifests: Arc::new(SqliteManifestStore::new(Arc::clone(db))),
            statuses: Arc::new(SqliteStatusStore::new(Arc::clone(db))),
            journals: Arc::new(SqliteJournalRepository::new(Arc::clone(db))),
            entries: Arc::new(SqliteEntryRepository::new(Arc::clone(db))),
            attachments: Arc::new(SqliteAttachmentRepository::new(Arc::clone(db))),
        }
    }
}

/// The reconciliation engine for one configuration's runs.
///
/// All collaborators are constructor-injected so the engine runs against
/// fakes in tests ([`crate::transport::MemoryTransport`] in particular).
pub struct SyncEngine {
    transport: Arc<dyn Transport>,
    journals: Arc<dyn JournalRepository>,
    entries: Arc<dyn EntryRepository>,
    attachments: Arc<dyn AttachmentRepository>,
    manifests: Arc<dyn ManifestStore>,
    locks: Arc<OperationLocks>,
    file_root: PathBuf,
    policy: ConflictPolicy,
}

/// What reconciliation decided for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Local, remote, and manifest agree
    Skip,
    /// Only local changed (or remote vanished): push
    Upload,
    /// Only remote changed (or local vanished): pull and apply
    Download,
    /// Both sides changed since the last sync
    Conflict,
}

impl SyncEngine {
    /// Engine over the given collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        journals: Arc<dyn JournalRepository>,
        entries: Arc<dyn EntryRepository>,
        attachments: Arc<dyn AttachmentRepository>,
        manifests: Arc<dyn ManifestStore>,
        locks: Arc<OperationLocks>,
        file_root: PathBuf,
    ) -> Self {
        Self {
            transport,
            journals,
            entries,
            attachments,
            manifests,
            locks,
            file_root,
            policy: ConflictPolicy::default(),
        }
    }

    /// Override the conflict resolution policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute one reconciliation run.
    ///
    /// Never panics or propagates engine-internal errors: the outcome is
    /// always a terminal [`SyncStatus`].
    pub async fn run(
        &self,
        config: &SyncConfig,
        cancel: &CancelFlag,
        on_status: Option<&StatusCallback>,
    ) -> SyncStatus {
        let mut run = Run {
            engine: self,
            config,
            cancel,
            on_status,
            status: SyncStatus::started(config.id),
            errors: Vec::new(),
            handled_attachments: BTreeSet::new(),
            uploads: 0,
            downloads: 0,
            processed: 0,
            total: 0,
        };
        run.emit();

        match run.execute().await {
            Ok(()) => {}
            Err(error) => {
                warn!(config = %config.id, %error, "sync run failed");
                run.status.state = SyncState::Failed;
                run.status.message = "Sync failed".to_string();
                run.status.error_message = Some(error.to_string());
                run.emit();
            }
        }
        run.status
    }
}

/// Shared-document state threaded through one run.
struct DocState {
    doc: JournalsDocument,
    dirty: bool,
    /// Journal manifest entries deferred until the shared document write
    /// is confirmed.
    pending: Vec<(EntityKey, ManifestEntry)>,
}

/// One in-flight reconciliation run.
struct Run<'a> {
    engine: &'a SyncEngine,
    config: &'a SyncConfig,
    cancel: &'a CancelFlag,
    on_status: Option<&'a StatusCallback>,
    status: SyncStatus,
    errors: Vec<String>,
    /// Attachments already handled in this run; excluded from the upload
    /// phase.
    handled_attachments: BTreeSet<AttachmentId>,
    uploads: usize,
    downloads: usize,
    processed: usize,
    total: usize,
}

impl Run<'_> {
    async fn execute(&mut self) -> Result<()> {
        // Connect; any failure here is fatal.
        self.engine.transport.ping().await?;
        self.engine.transport.mkdir(REMOTE_ROOT).await?;

        let manifest = self.engine.manifests.load(&self.config.id)?;

        let mut docs = DocState {
            doc: match self.engine.transport.read(&journals_doc_path()).await {
                Ok(bytes) => JournalsDocument::from_bytes(&bytes)?,
                Err(TransportError::NotFound(_)) => JournalsDocument::default(),
                Err(error) => return Err(error.into()),
            },
            dirty: false,
            pending: Vec::new(),
        };

        let local_journals: BTreeMap<JournalId, Journal> = self
            .engine
            .journals
            .list()?
            .into_iter()
            .filter(|journal| self.config.includes_journal(&journal.id))
            .map(|journal| (journal.id, journal))
            .collect();

        let journal_ids = self.plan_journals(&local_journals, &docs.doc, &manifest);
        let local_bundles = self.load_local_bundles(&local_journals)?;
        let bundle_keys = self.plan_bundles(&journal_ids, &local_bundles, &docs.doc, &manifest);

        self.total = journal_ids.len() + bundle_keys.len();

        let mut cancelled = false;

        for id in &journal_ids {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.processed += 1;
            self.reconcile_journal(*id, local_journals.get(id), &manifest, &mut docs)?;
        }

        if !cancelled {
            for (journal_id, period) in &bundle_keys {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                self.processed += 1;
                self.reconcile_bundle(
                    *journal_id,
                    *period,
                    local_bundles.get(&(*journal_id, *period)),
                    &manifest,
                    &mut docs,
                )
                .await?;
            }
        }

        if !cancelled && self.config.sync_attachments {
            cancelled = self.upload_attachments(&local_journals, &manifest).await?;
        }

        // Bookkeeping for confirmed uploads; not an entity, so it still
        // runs after cancellation.
        if docs.dirty {
            self.write_journals_doc(&mut docs).await?;
        }

        if cancelled {
            self.status.state = SyncState::Cancelled;
            self.status.message = "Sync cancelled".to_string();
        } else {
            self.status.progress = 1.0;
            self.status.state = SyncState::Completed;
            self.status.message = format!(
                "{} uploaded, {} downloaded",
                self.uploads, self.downloads
            );
            if !self.errors.is_empty() {
                self.status.error_message = Some(self.error_summary());
            }
        }
        self.emit();
        Ok(())
    }

    // ----- planning -------------------------------------------------------

    fn plan_journals(
        &self,
        local: &BTreeMap<JournalId, Journal>,
        doc: &JournalsDocument,
        manifest: &BTreeMap<EntityKey, ManifestEntry>,
    ) -> BTreeSet<JournalId> {
        let mut ids: BTreeSet<JournalId> = local.keys().copied().collect();
        ids.extend(
            doc.journals
                .keys()
                .copied()
                .filter(|id| self.config.includes_journal(id)),
        );
        for key in manifest.keys() {
            if let EntityKey::Journal(id) = key {
                if self.config.includes_journal(id) {
                    ids.insert(*id);
                }
            }
        }
        ids
    }

    fn load_local_bundles(
        &self,
        local_journals: &BTreeMap<JournalId, Journal>,
    ) -> Result<BTreeMap<(JournalId, Period), Vec<Entry>>> {
        let mut bundles = BTreeMap::new();
        for id in local_journals.keys() {
            let entries = self.engine.entries.list_by_journal(id)?;
            for (period, bucket) in entries_by_period(&entries) {
                bundles.insert((*id, period), bucket);
            }
        }
        Ok(bundles)
    }

    fn plan_bundles(
        &self,
        journal_ids: &BTreeSet<JournalId>,
        local_bundles: &BTreeMap<(JournalId, Period), Vec<Entry>>,
        doc: &JournalsDocument,
        manifest: &BTreeMap<EntityKey, ManifestEntry>,
    ) -> BTreeSet<(JournalId, Period)> {
        let mut keys: BTreeSet<(JournalId, Period)> = local_bundles.keys().copied().collect();
        for id in journal_ids {
            for period in doc.periods_for(id) {
                keys.insert((*id, period));
            }
        }
        for key in manifest.keys() {
            if let EntityKey::EntryBundle(id, period) = key {
                if self.config.includes_journal(id) {
                    keys.insert((*id, *period));
                }
            }
        }
        keys
    }

    // ----- journals -------------------------------------------------------

    fn reconcile_journal(
        &mut self,
        id: JournalId,
        local: Option<&Journal>,
        manifest: &BTreeMap<EntityKey, ManifestEntry>,
        docs: &mut DocState,
    ) -> Result<()> {
        let key = EntityKey::Journal(id);
        let remote = docs.doc.journal(&id).cloned();

        let local_fp = local.map(journal_fingerprint).transpose()?;
        let remote_fp = remote.as_ref().map(journal_fingerprint).transpose()?;

        let mut action = classify(
            local.is_some(),
            remote.is_some(),
            local_fp.as_deref(),
            remote_fp.as_deref(),
            manifest.get(&key),
        );
        if action == Action::Conflict {
            // Whole-record resolution; the per-entry variant lives in
            // EntryBundle::merge.
            let local_at = local.map_or(0, |journal| journal.updated_at);
            let remote_at = remote.as_ref().map_or(0, |journal| journal.updated_at);
            action = if self.engine.policy.local_wins(local_at, remote_at) {
                Action::Upload
            } else {
                Action::Download
            };
        }

        match action {
            Action::Skip | Action::Conflict => {}
            Action::Upload => {
                let (Some(journal), Some(local_fp)) = (local, local_fp) else {
                    return Ok(());
                };
                self.set_state(
                    SyncState::Uploading,
                    format!("Uploading journal \"{}\"", journal.name),
                );
                docs.doc.upsert_journal(journal.clone());
                docs.dirty = true;
                docs.pending.push((
                    key,
                    ManifestEntry::new(journals_doc_path(), local_fp.clone(), local_fp),
                ));
                self.uploads += 1;
            }
            Action::Download => {
                let (Some(journal), Some(remote_fp)) = (remote, remote_fp) else {
                    return Ok(());
                };
                self.set_state(
                    SyncState::Downloading,
                    format!("Downloading journal \"{}\"", journal.name),
                );
                self.engine.journals.upsert(&journal)?;
                self.engine.manifests.save_entry(
                    &self.config.id,
                    &key,
                    &ManifestEntry::new(journals_doc_path(), remote_fp.clone(), remote_fp),
                )?;
                self.downloads += 1;
            }
        }
        Ok(())
    }

    async fn write_journals_doc(&mut self, docs: &mut DocState) -> Result<()> {
        let bytes = docs.doc.to_bytes()?;
        match self
            .engine
            .transport
            .write(&journals_doc_path(), &bytes)
            .await
        {
            Ok(()) => {
                for (key, entry) in docs.pending.drain(..) {
                    self.engine
                        .manifests
                        .save_entry(&self.config.id, &key, &entry)?;
                }
                docs.dirty = false;
                Ok(())
            }
            Err(error) if error.is_fatal() => Err(error.into()),
            Err(error) => {
                // Manifest entries for those journals stay unwritten; they
                // re-diff as changed on the next run.
                self.errors.push(format!("journals document: {error}"));
                docs.pending.clear();
                Ok(())
            }
        }
    }

    // ----- entry bundles --------------------------------------------------

    async fn reconcile_bundle(
        &mut self,
        journal_id: JournalId,
        period: Period,
        local_entries: Option<&Vec<Entry>>,
        manifest: &BTreeMap<EntityKey, ManifestEntry>,
        docs: &mut DocState,
    ) -> Result<()> {
        let key = EntityKey::EntryBundle(journal_id, period);
        let path = bundle_path(&journal_id, period);

        let local_bundle = match local_entries {
            Some(entries) => Some(EntryBundle::new(
                journal_id,
                period,
                self.build_records(entries)?,
            )),
            None => None,
        };
        let local_bytes = local_bundle
            .as_ref()
            .map(EntryBundle::to_bytes)
            .transpose()?;
        let local_fp = local_bytes.as_deref().map(fingerprint);

        let remote = match self.engine.transport.read(&path).await {
            Ok(bytes) => {
                let version = fingerprint(&bytes);
                match EntryBundle::from_bytes(&bytes) {
                    Ok(bundle) => Some((bundle, version)),
                    Err(error) => {
                        self.record_error(&key, &format!("unreadable remote bundle: {error}"));
                        return Ok(());
                    }
                }
            }
            Err(TransportError::NotFound(_)) => None,
            Err(error) => return self.transport_failure(&key, error),
        };

        let action = classify(
            local_bundle.is_some(),
            remote.is_some(),
            local_fp.as_deref(),
            remote.as_ref().map(|(_, version)| version.as_str()),
            manifest.get(&key),
        );

        match action {
            Action::Skip => Ok(()),
            // Pushing a period document is always read-modify-write: when
            // a remote version exists, local records are merged into it
            // entry by entry (last write wins, ties local) before the
            // document is written back. A conflict is the same operation.
            Action::Upload | Action::Conflict => {
                let Some(local) = &local_bundle else {
                    return Ok(());
                };
                let merged = match &remote {
                    Some((remote_bundle, _)) => EntryBundle::merge(local, remote_bundle),
                    None => local.clone(),
                };
                if remote.is_some() && !self.apply_bundle(&merged).await? {
                    self.record_error(&key, "journal record missing locally; bundle skipped");
                    return Ok(());
                }
                // Fingerprint what the local store actually holds now, so
                // a failed attachment download keeps this bundle dirty and
                // retried next run.
                let rebuilt = self.rebuild_bundle(journal_id, period)?;
                let local_after = fingerprint(&rebuilt.to_bytes()?);
                self.upload_bundle(&key, &path, &merged, &local_after, docs)
                    .await
            }
            Action::Download => {
                let Some((bundle, version)) = &remote else {
                    return Ok(());
                };
                self.set_state(
                    SyncState::Downloading,
                    format!("Downloading entries for {period}"),
                );
                if !self.apply_bundle(bundle).await? {
                    self.record_error(&key, "journal record missing locally; bundle skipped");
                    return Ok(());
                }
                let rebuilt = self.rebuild_bundle(journal_id, period)?;
                let local_after = fingerprint(&rebuilt.to_bytes()?);
                self.engine.manifests.save_entry(
                    &self.config.id,
                    &key,
                    &ManifestEntry::new(path, local_after, version.clone()),
                )?;
                self.downloads += 1;
                Ok(())
            }
        }
    }

    async fn upload_bundle(
        &mut self,
        key: &EntityKey,
        path: &str,
        bundle: &EntryBundle,
        local_fingerprint: &str,
        docs: &mut DocState,
    ) -> Result<()> {
        self.set_state(
            SyncState::Uploading,
            format!("Uploading entries for {}", bundle.period),
        );
        let bytes = bundle.to_bytes()?;
        match self.engine.transport.write(path, &bytes).await {
            Ok(()) => {
                self.engine.manifests.save_entry(
                    &self.config.id,
                    key,
                    &ManifestEntry::new(
                        path.to_string(),
                        local_fingerprint.to_string(),
                        fingerprint(&bytes),
                    ),
                )?;
                if let Ok(period) = bundle.period.parse() {
                    if docs.doc.add_period(bundle.journal_id, period) {
                        docs.dirty = true;
                    }
                }
                self.uploads += 1;
                Ok(())
            }
            Err(error) => self.transport_failure(key, error),
        }
    }

    /// Apply a (remote or merged) bundle to the local store.
    ///
    /// Entry rows are upserted only when the incoming record is strictly
    /// newer. Returns `false` when the owning journal has no local row yet
    /// (the bundle cannot be applied without breaking referential
    /// integrity).
    async fn apply_bundle(&mut self, bundle: &EntryBundle) -> Result<bool> {
        if self.engine.journals.get(&bundle.journal_id)?.is_none() {
            return Ok(false);
        }

        for record in &bundle.entries {
            let existing = self.engine.entries.get(&record.entry.id)?;
            let apply = existing
                .as_ref()
                .is_none_or(|entry| record.entry.updated_at > entry.updated_at);
            if apply {
                self.engine.entries.upsert(&record.entry)?;
            }
            if self.config.sync_attachments {
                for attachment in &record.attachments {
                    self.download_attachment(attachment).await?;
                }
            }
        }
        Ok(true)
    }

    fn build_records(&self, entries: &[Entry]) -> Result<Vec<EntryRecord>> {
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let attachments = if self.config.sync_attachments {
                self.engine.attachments.list_by_entry(&entry.id)?
            } else {
                Vec::new()
            };
            records.push(EntryRecord {
                entry: entry.clone(),
                attachments,
            });
        }
        Ok(records)
    }

    fn rebuild_bundle(&self, journal_id: JournalId, period: Period) -> Result<EntryBundle> {
        let entries: Vec<Entry> = self
            .engine
            .entries
            .list_by_journal(&journal_id)?
            .into_iter()
            .filter(|entry| entry.period() == period)
            .collect();
        Ok(EntryBundle::new(
            journal_id,
            period,
            self.build_records(&entries)?,
        ))
    }

    // ----- attachments ----------------------------------------------------

    /// Fetch one attachment referenced by a downloaded entry record.
    ///
    /// The local row is inserted only after the content is on disk, so an
    /// attachment record never points at a missing file.
    async fn download_attachment(&mut self, attachment: &Attachment) -> Result<()> {
        let key = EntityKey::Attachment(attachment.id);
        if self.engine.attachments.get(&attachment.id)?.is_some() {
            self.handled_attachments.insert(attachment.id);
            return Ok(());
        }
        if attachment.is_legacy() {
            // Written by a device that has not migrated yet; its bytes are
            // not addressable on the remote.
            self.handled_attachments.insert(attachment.id);
            self.record_error(&key, "legacy path from an unmigrated device; skipped");
            return Ok(());
        }

        let _guard = self.engine.locks.acquire(attachment.id).await;
        if self.engine.attachments.get(&attachment.id)?.is_some() {
            self.handled_attachments.insert(attachment.id);
            return Ok(());
        }

        let remote = file_path(&attachment.path);
        self.set_state(
            SyncState::Downloading,
            format!("Downloading attachment {}", attachment.name),
        );
        let bytes = match self.engine.transport.read(&remote).await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.handled_attachments.insert(attachment.id);
                return self.transport_failure(&key, error);
            }
        };

        let dest = self.engine.file_root.join(&attachment.path);
        if let Err(error) = write_file(&dest, &bytes).await {
            self.handled_attachments.insert(attachment.id);
            self.record_error(&key, &format!("writing {}: {error}", dest.display()));
            return Ok(());
        }

        self.engine.attachments.insert(attachment)?;
        let version = fingerprint(&bytes);
        self.engine.manifests.save_entry(
            &self.config.id,
            &key,
            &ManifestEntry::new(remote, version.clone(), version),
        )?;
        self.handled_attachments.insert(attachment.id);
        self.downloads += 1;
        Ok(())
    }

    /// Push local attachment content the remote does not have yet (or has
    /// an older version of). Returns whether the phase was cancelled.
    async fn upload_attachments(
        &mut self,
        local_journals: &BTreeMap<JournalId, Journal>,
        manifest: &BTreeMap<EntityKey, ManifestEntry>,
    ) -> Result<bool> {
        let mut candidates: Vec<Attachment> = Vec::new();
        for journal_id in local_journals.keys() {
            for entry in self.engine.entries.list_by_journal(journal_id)? {
                if entry.is_deleted {
                    continue;
                }
                candidates.extend(self.engine.attachments.list_by_entry(&entry.id)?);
            }
        }
        candidates.retain(|attachment| !self.handled_attachments.contains(&attachment.id));
        candidates.sort_by_key(|attachment| attachment.id);
        self.total += candidates.len();

        for attachment in candidates {
            if self.cancel.is_cancelled() {
                return Ok(true);
            }
            self.processed += 1;
            let key = EntityKey::Attachment(attachment.id);

            if attachment.is_legacy() {
                self.record_error(
                    &key,
                    "legacy absolute path; run file migration before syncing",
                );
                continue;
            }

            let source = self.engine.file_root.join(&attachment.path);
            let bytes = match tokio::fs::read(&source).await {
                Ok(bytes) => bytes,
                Err(error) => {
                    self.record_error(&key, &format!("reading {}: {error}", source.display()));
                    continue;
                }
            };
            let fp = fingerprint(&bytes);
            if manifest
                .get(&key)
                .is_some_and(|entry| entry.fingerprint == fp)
            {
                continue;
            }

            let _guard = self.engine.locks.acquire(attachment.id).await;
            self.set_state(
                SyncState::Uploading,
                format!("Uploading attachment {}", attachment.name),
            );
            let remote = file_path(&attachment.path);
            match self.engine.transport.write(&remote, &bytes).await {
                Ok(()) => {
                    self.engine.manifests.save_entry(
                        &self.config.id,
                        &key,
                        &ManifestEntry::new(remote, fp.clone(), fp),
                    )?;
                    self.uploads += 1;
                }
                Err(error) => self.transport_failure(&key, error)?,
            }
        }
        Ok(false)
    }

    // ----- bookkeeping ----------------------------------------------------

    fn record_error(&mut self, key: &EntityKey, reason: &str) {
        debug!(entity = %key, reason, "entity failed; continuing");
        self.errors.push(format!("{key}: {reason}"));
    }

    fn transport_failure(&mut self, key: &EntityKey, error: TransportError) -> Result<()> {
        if error.is_fatal() {
            return Err(error.into());
        }
        self.record_error(key, &error.to_string());
        Ok(())
    }

    fn error_summary(&self) -> String {
        const SHOWN: usize = 5;
        let mut summary = self
            .errors
            .iter()
            .take(SHOWN)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        if self.errors.len() > SHOWN {
            summary.push_str(&format!(" (and {} more)", self.errors.len() - SHOWN));
        }
        summary
    }

    fn set_state(&mut self, state: SyncState, message: String) {
        self.status.state = state;
        self.status.message = message;
        self.emit();
    }

    fn emit(&mut self) {
        if !self.status.state.is_terminal() {
            #[allow(clippy::cast_precision_loss)]
            let progress = if self.total == 0 {
                0.0
            } else {
                (self.processed as f32 / self.total as f32).min(1.0)
            };
            self.status.progress = progress;
        }
        if let Some(callback) = self.on_status {
            callback(&self.status);
        }
    }
}

/// Classify one entity against the manifest.
///
/// Fingerprints detect change against the manifest snapshot; presence
/// flags cover creation, deletion-by-interference, and never-synced
/// states.
fn classify(
    local_present: bool,
    remote_present: bool,
    local_fp: Option<&str>,
    remote_fp: Option<&str>,
    manifest: Option<&ManifestEntry>,
) -> Action {
    match (local_present, remote_present, manifest) {
        (false, false, _) => Action::Skip,
        // New local entity
        (true, false, None) => Action::Upload,
        // New remote entity
        (false, true, None) => Action::Download,
        // Both sides created independently since the last sync
        (true, true, None) => Action::Conflict,
        // Synced before, remote object vanished: heal by re-uploading
        (true, false, Some(_)) => Action::Upload,
        // Synced before, local row vanished: restore from remote
        (false, true, Some(_)) => Action::Download,
        (true, true, Some(entry)) => {
            let local_changed = local_fp != Some(entry.fingerprint.as_str());
            let remote_changed = remote_fp != Some(entry.remote_version.as_str());
            match (local_changed, remote_changed) {
                (false, false) => Action::Skip,
                (true, false) => Action::Upload,
                (false, true) => Action::Download,
                (true, true) => Action::Conflict,
            }
        }
    }
}

async fn write_file(dest: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, bytes).await
}

/// Caller-facing sync surface: mutual exclusion per config, credential
/// lookup, transport construction, status persistence.
pub struct SyncService {
    stores: SyncStores,
    credentials: Arc<dyn CredentialStore>,
    transports: Arc<dyn TransportFactory>,
    locks: Arc<OperationLocks>,
    file_root: PathBuf,
    active: Mutex<HashMap<SyncConfigId, CancelFlag>>,
}

impl SyncService {
    /// Service over the given collaborators.
    #[must_use]
    pub fn new(
        stores: SyncStores,
        credentials: Arc<dyn CredentialStore>,
        transports: Arc<dyn TransportFactory>,
        locks: Arc<OperationLocks>,
        file_root: PathBuf,
    ) -> Self {
        Self {
            stores,
            credentials,
            transports,
            locks,
            file_root,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Run one sync for a configuration.
    ///
    /// At most one run per config may be active; a second call while one
    /// is in flight fails with [`Error::SyncInProgress`]. Runs for
    /// different configs proceed in parallel.
    pub async fn perform_sync(
        &self,
        config_id: SyncConfigId,
        on_status: Option<StatusCallback>,
    ) -> Result<SyncStatus> {
        let config = self
            .stores
            .configs
            .get(&config_id)?
            .ok_or_else(|| Error::NotFound(config_id.to_string()))?;

        let cancel = CancelFlag::new();
        {
            let mut active = self
                .active
                .lock()
                .map_err(|_| Error::Database("run registry lock poisoned".to_string()))?;
            if active.contains_key(&config_id) {
                return Err(Error::SyncInProgress(config_id.to_string()));
            }
            active.insert(config_id, cancel.clone());
        }
        let _guard = ActiveRunGuard {
            service: self,
            config_id,
        };

        let status = self.run(&config, &cancel, on_status.as_ref()).await;

        self.stores.statuses.save(&status)?;
        if status.state == SyncState::Completed {
            let mut config = config;
            config.last_sync_at = Some(chrono::Utc::now().timestamp_millis());
            self.stores.configs.update(&config)?;
        }
        Ok(status)
    }

    async fn run(
        &self,
        config: &SyncConfig,
        cancel: &CancelFlag,
        on_status: Option<&StatusCallback>,
    ) -> SyncStatus {
        if !config.enabled {
            return fail_fast(config.id, "Sync configuration is disabled", on_status);
        }

        let credential = match self.credentials.get(&config.id) {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                return fail_fast(
                    config.id,
                    "No credential stored for this configuration",
                    on_status,
                )
            }
            Err(error) => {
                return fail_fast(
                    config.id,
                    &format!("Credential lookup failed: {error}"),
                    on_status,
                )
            }
        };

        let transport = match self.transports.connect(config, &credential) {
            Ok(transport) => transport,
            Err(error) => return fail_fast(config.id, &error.to_string(), on_status),
        };

        let engine = SyncEngine::new(
            transport,
            Arc::clone(&self.stores.journals),
            Arc::clone(&self.stores.entries),
            Arc::clone(&self.stores.attachments),
            Arc::clone(&self.stores.manifests),
            Arc::clone(&self.locks),
            self.file_root.clone(),
        );
        engine.run(config, cancel, on_status).await
    }

    /// Whether a run is currently active for the config.
    pub fn is_running(&self, config_id: &SyncConfigId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains_key(config_id))
            .unwrap_or(false)
    }

    /// Request cancellation of an active run. Returns whether a run was
    /// active for the config.
    pub fn request_cancel(&self, config_id: &SyncConfigId) -> bool {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.get(config_id).cloned())
            .map(|flag| flag.cancel())
            .is_some()
    }

    /// Check that the server is reachable with the given credential.
    pub async fn test_connection(&self, config: &SyncConfig, credential: &str) -> bool {
        match self.transports.connect(config, credential) {
            Ok(transport) => transport.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    /// Drop a configuration's manifest, forcing a full re-diff on the
    /// next run.
    pub fn clear_local_manifest(&self, config_id: &SyncConfigId) -> Result<()> {
        self.stores.manifests.clear(config_id)
    }

    /// Last known status for a configuration (idle when no run was ever
    /// recorded).
    pub fn status(&self, config_id: &SyncConfigId) -> Result<SyncStatus> {
        Ok(self
            .stores
            .statuses
            .load(config_id)?
            .unwrap_or_else(|| SyncStatus::idle(*config_id)))
    }

    /// Register a configuration together with its credential.
    pub fn add_config(&self, config: &SyncConfig, credential: &str) -> Result<()> {
        self.credentials.set(&config.id, credential)?;
        self.stores.configs.create(config)
    }

    /// Delete a configuration, cascading to its manifest, status, and
    /// credential.
    pub fn delete_config(&self, config_id: &SyncConfigId) -> Result<()> {
        self.stores.configs.delete(config_id)?;
        self.credentials.delete(config_id)
    }

    /// The config store, for listing and settings updates.
    #[must_use]
    pub fn configs(&self) -> &Arc<dyn SyncConfigStore> {
        &self.stores.configs
    }
}

/// Removes a config from the active-run registry when the run ends.
struct ActiveRunGuard<'a> {
    service: &'a SyncService,
    config_id: SyncConfigId,
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.service.active.lock() {
            active.remove(&self.config_id);
        }
    }
}

fn fail_fast(
    config_id: SyncConfigId,
    reason: &str,
    on_status: Option<&StatusCallback>,
) -> SyncStatus {
    warn!(config = %config_id, reason, "sync refused");
    let mut status = SyncStatus::started(config_id);
    status.state = SyncState::Failed;
    status.message = "Sync failed".to_string();
    status.error_message = Some(reason.to_string());
    if let Some(callback) = on_status {
        callback(&status);
    }
    status
}
