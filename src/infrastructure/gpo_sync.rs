//! Registers one preference entry in a GPO
//!
//! A run walks a fixed sequence of stages: verify the GPO folder, make sure
//! the preference folder exists, read any existing document, write the new
//! document, then update the extension list and the policy version. The
//! document always lands on the share before any version is advanced.

use serde::Serialize;
use std::fmt;

use super::session::{DirectorySession, FileHandle, FileShareSession, ShareHandle};
use super::version_sync::VersionSynchronizer;
use crate::domain::{
    gpo_ldap_url, gpo_share_path, merge_extension_names, parse_directory_version, parse_existing,
    render_document, EntryStamp, EntrySummary, GpoId, GpoScope, PreferenceEntry, PreferenceKind,
    PreferenceParams, SyncConfig, VERSION_ATTRIBUTE,
};
use crate::error::{AppError, AppResult};

/// Progress of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Start,
    TargetVerified,
    DirectoryEnsured,
    DocumentObtained,
    Blocked,
    DocumentWritten,
    VersionSynced,
    Done,
    Failed,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Start => "start",
            SyncStage::TargetVerified => "target verified",
            SyncStage::DirectoryEnsured => "directory ensured",
            SyncStage::DocumentObtained => "document obtained",
            SyncStage::Blocked => "blocked",
            SyncStage::DocumentWritten => "document written",
            SyncStage::VersionSynced => "version synced",
            SyncStage::Done => "done",
            SyncStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to register and where
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// DNS name of the domain hosting the GPO
    pub domain: String,
    pub gpo_id: GpoId,
    pub scope: GpoScope,
    pub params: PreferenceParams,
    /// Explicit `changed` timestamp, passed through as given
    pub changed: Option<String>,
    /// Append to an existing document instead of declining
    pub force: bool,
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub gpo_id: String,
    pub scope: GpoScope,
    pub kind: PreferenceKind,
    /// Share-relative path of the preference document
    pub document_path: String,
    /// False when the entry was appended to an existing document
    pub document_created: bool,
    pub uid: String,
    pub label: String,
    pub changed: String,
    pub extension_attribute: String,
    pub extension_names: String,
    pub extension_names_updated: bool,
    pub previous_version: u32,
    pub version: u32,
}

/// Document read from the share, still open
struct ObtainedDocument {
    handle: FileHandle,
    existing: Option<String>,
}

/// Drives one registration against a directory and a file share
pub struct SyncOrchestrator<'a> {
    directory: &'a mut dyn DirectorySession,
    share: &'a mut dyn FileShareSession,
    config: &'a SyncConfig,
    stage: SyncStage,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        directory: &'a mut dyn DirectorySession,
        share: &'a mut dyn FileShareSession,
        config: &'a SyncConfig,
    ) -> Self {
        Self {
            directory,
            share,
            config,
            stage: SyncStage::Start,
        }
    }

    /// Stage reached by the last run
    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    fn enter(&mut self, stage: SyncStage) {
        tracing::debug!(from = %self.stage, to = %stage, "Sync stage transition");
        self.stage = stage;
    }

    /// Register `request.params` in the GPO.
    ///
    /// A declined write (existing document without `force`) comes back as
    /// `ExistingUnconfirmed` and leaves the stage at `Blocked`.
    pub fn run(&mut self, request: &SyncRequest) -> AppResult<SyncReport> {
        self.stage = SyncStage::Start;

        let result = self.execute(request);
        match &result {
            Ok(report) => {
                self.enter(SyncStage::Done);
                tracing::info!(
                    gpo_id = %report.gpo_id,
                    kind = %report.kind,
                    label = %report.label,
                    version = report.version,
                    "Preference registered"
                );
            }
            Err(AppError::ExistingUnconfirmed { .. }) => {}
            Err(e) => {
                tracing::error!(stage = %self.stage, error = %e, "Sync failed");
                self.enter(SyncStage::Failed);
            }
        }
        result
    }

    fn execute(&mut self, request: &SyncRequest) -> AppResult<SyncReport> {
        let kind = request.params.kind();
        if !kind.supports_scope(request.scope) {
            return Err(AppError::InvalidArgument(format!(
                "{} preferences can only be registered for the Machine scope",
                kind
            )));
        }
        let stamp = EntryStamp::new(request.changed.as_deref(), self.config.backdate_days)?;

        let share = self.share.connect_share(&self.config.share_name)?;
        let gpo_path = gpo_share_path(&request.gpo_id, &request.domain);

        self.verify_target(&share, &request.gpo_id, &gpo_path)?;
        self.enter(SyncStage::TargetVerified);

        let folder = self.ensure_directory(&share, &gpo_path, kind, request.scope)?;
        self.enter(SyncStage::DirectoryEnsured);

        let document_path = format!("{}/{}", folder, kind.document_name());
        let obtained = self.obtain_document(&share, kind, &document_path, request.force)?;
        self.enter(SyncStage::DocumentObtained);

        let entry = PreferenceEntry::new(request.params.clone(), stamp, request.scope);
        let document_created = obtained.existing.is_none();
        self.write_document(obtained, &entry)?;
        self.enter(SyncStage::DocumentWritten);

        tracing::info!(
            path = %document_path,
            uid = %entry.stamp.uid,
            label = %entry.label(),
            created = document_created,
            "Preference document written"
        );

        let url = gpo_ldap_url(
            &request.gpo_id,
            &request.domain,
            self.config.directory_server.as_deref(),
        );
        if !self.directory.connect(&url) {
            return Err(AppError::ConnectionFailed(format!("cannot bind to {}", url)));
        }

        let synced = self.sync_directory(&share, request, kind, &gpo_path);
        self.directory.disconnect();
        let (extension_names, extension_names_updated, previous_version, version) = synced?;
        self.enter(SyncStage::VersionSynced);

        Ok(SyncReport {
            gpo_id: request.gpo_id.to_string(),
            scope: request.scope,
            kind,
            document_path,
            document_created,
            uid: entry.stamp.uid.clone(),
            label: entry.label(),
            changed: entry.stamp.changed.clone(),
            extension_attribute: request.scope.extension_attribute().to_string(),
            extension_names,
            extension_names_updated,
            previous_version,
            version,
        })
    }

    fn verify_target(&mut self, share: &ShareHandle, gpo_id: &GpoId, gpo_path: &str) -> AppResult<()> {
        if !self.share.path_exists(share, gpo_path)? {
            return Err(AppError::TargetNotFound {
                gpo_id: gpo_id.braced(),
                path: gpo_path.to_string(),
            });
        }
        tracing::debug!(path = gpo_path, "GPO folder found");
        Ok(())
    }

    /// Create `<gpo>/<Scope>/Preferences/<Kind>` one level at a time
    fn ensure_directory(
        &mut self,
        share: &ShareHandle,
        gpo_path: &str,
        kind: PreferenceKind,
        scope: GpoScope,
    ) -> AppResult<String> {
        let mut path = gpo_path.to_string();
        for component in kind.directory_components(scope) {
            path.push('/');
            path.push_str(component);
            if self.share.path_exists(share, &path)? {
                continue;
            }
            self.share.create_directory(share, &path).map_err(|e| match e {
                AppError::PermissionDenied(msg) => AppError::PermissionDenied(format!(
                    "{} (write access to the GPO folder on the share is required)",
                    msg
                )),
                other => other,
            })?;
            tracing::info!(path = %path, "Created directory");
        }
        Ok(path)
    }

    fn obtain_document(
        &mut self,
        share: &ShareHandle,
        kind: PreferenceKind,
        path: &str,
        force: bool,
    ) -> AppResult<ObtainedDocument> {
        let Some(handle) = self.share.open_file(share, path)? else {
            tracing::debug!(path = path, "No existing document");
            let handle = self.share.create_file(share, path)?;
            return Ok(ObtainedDocument {
                handle,
                existing: None,
            });
        };

        let existing = match self.inspect_existing(&handle, kind, path) {
            Ok(Some((_, entries))) if !force => {
                self.share.close_file(handle);
                for entry in &entries {
                    tracing::warn!(path = path, entry = %entry, "Existing preference entry");
                }
                self.enter(SyncStage::Blocked);
                return Err(AppError::ExistingUnconfirmed {
                    document: path.to_string(),
                    entries,
                });
            }
            Ok(Some((body, entries))) => {
                tracing::info!(path = path, entries = entries.len(), "Appending to existing document");
                Some(body)
            }
            Ok(None) => {
                tracing::debug!(path = path, "Existing document is empty");
                None
            }
            Err(e) => {
                self.share.close_file(handle);
                return Err(e);
            }
        };

        Ok(ObtainedDocument { handle, existing })
    }

    /// Read and list an open document; `None` when it has no content
    fn inspect_existing(
        &mut self,
        handle: &FileHandle,
        kind: PreferenceKind,
        path: &str,
    ) -> AppResult<Option<(String, Vec<EntrySummary>)>> {
        let bytes = self.share.read_file(handle)?;
        let body = String::from_utf8(bytes).map_err(|e| AppError::MalformedExistingDocument {
            document: path.to_string(),
            reason: format!("not UTF-8: {}", e),
        })?;

        if body.trim_start_matches('\u{feff}').trim().is_empty() {
            return Ok(None);
        }

        let entries = parse_existing(kind, body.trim_start_matches('\u{feff}'))?;
        Ok(Some((body, entries)))
    }

    fn write_document(&mut self, obtained: ObtainedDocument, entry: &PreferenceEntry) -> AppResult<()> {
        let ObtainedDocument { handle, existing } = obtained;
        let result = render_document(existing.as_deref(), entry)
            .and_then(|body| self.share.write_file(&handle, body.as_bytes()));
        self.share.close_file(handle);
        result
    }

    /// Merge the extension list, then advance both version stores
    fn sync_directory(
        &mut self,
        share: &ShareHandle,
        request: &SyncRequest,
        kind: PreferenceKind,
        gpo_path: &str,
    ) -> AppResult<(String, bool, u32, u32)> {
        let attribute = request.scope.extension_attribute();
        let current = self.directory.get_attribute(attribute)?;
        let merged = merge_extension_names(current.as_deref(), kind.cse_guid(), kind.extension_guid())?;

        let updated = current.as_deref() != Some(merged.as_str());
        if updated {
            if !self.directory.set_attribute(attribute, &merged, current.as_deref())? {
                return Err(AppError::ConcurrentModification {
                    attribute: attribute.to_string(),
                });
            }
            tracing::info!(attribute = attribute, value = %merged, "Extension names updated");
        } else {
            tracing::debug!(attribute = attribute, "Extension already registered");
        }

        let raw_version = self.directory.get_attribute(VERSION_ATTRIBUTE)?;
        let previous = parse_directory_version(raw_version.as_deref())?;
        let next = VersionSynchronizer::advance(previous, request.scope)?;

        let synchronizer = VersionSynchronizer::new(gpo_path, &self.config.version_file);
        let commit = synchronizer.commit(
            &mut *self.directory,
            &mut *self.share,
            share,
            raw_version.as_deref(),
            next,
        )?;

        Ok((merged, updated, previous, commit.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        read_file_version, CommandShell, EntrySummary, FileAction, FileParams, ServiceAction,
        ServiceParams, TaskParams, NULL_GUID,
    };
    use std::collections::{BTreeMap, BTreeSet, HashMap};

    const DOMAIN: &str = "contoso.com";
    const GPO: &str = "31B2F340-016D-11D2-945F-00C04FB984F9";

    fn gpo_path() -> String {
        format!("{}/Policies/{{{}}}", DOMAIN, GPO)
    }

    /// In-memory directory that records every write
    #[derive(Default)]
    struct SpyDirectory {
        attributes: HashMap<String, String>,
        unreachable: bool,
        /// Attributes changed behind the engine's back before the next write
        race: HashMap<String, String>,
        writes: Vec<(String, String)>,
        connected_url: Option<String>,
        disconnects: usize,
    }

    impl DirectorySession for SpyDirectory {
        fn connect(&mut self, url: &str) -> bool {
            self.connected_url = Some(url.to_string());
            !self.unreachable
        }

        fn get_attribute(&mut self, name: &str) -> AppResult<Option<String>> {
            Ok(self.attributes.get(name).cloned())
        }

        fn set_attribute(&mut self, name: &str, value: &str, expected: Option<&str>) -> AppResult<bool> {
            if let Some(raced) = self.race.remove(name) {
                self.attributes.insert(name.to_string(), raced);
            }
            if self.attributes.get(name).map(String::as_str) != expected {
                return Ok(false);
            }
            self.attributes.insert(name.to_string(), value.to_string());
            self.writes.push((name.to_string(), value.to_string()));
            Ok(true)
        }

        fn disconnect(&mut self) {
            self.disconnects += 1;
        }
    }

    /// In-memory share that records every write
    #[derive(Default)]
    struct SpyShare {
        directories: BTreeSet<String>,
        files: BTreeMap<String, Vec<u8>>,
        deny_mkdir: bool,
        deny_write: BTreeSet<String>,
        writes: Vec<String>,
        open_handles: usize,
    }

    impl SpyShare {
        fn with_gpo(version: u32) -> Self {
            let mut share = Self::default();
            share.directories.insert(gpo_path());
            share.files.insert(
                format!("{}/gpt.ini", gpo_path()),
                format!("[General]\r\nVersion={}\r\ndisplayName=New Group Policy Object\r\n", version)
                    .into_bytes(),
            );
            share
        }

        fn text(&self, path: &str) -> String {
            String::from_utf8(self.files[path].clone()).unwrap()
        }
    }

    impl FileShareSession for SpyShare {
        fn connect_share(&mut self, name: &str) -> AppResult<ShareHandle> {
            Ok(ShareHandle {
                name: name.to_string(),
            })
        }

        fn path_exists(&mut self, _share: &ShareHandle, path: &str) -> AppResult<bool> {
            Ok(self.directories.contains(path) || self.files.contains_key(path))
        }

        fn create_directory(&mut self, _share: &ShareHandle, path: &str) -> AppResult<()> {
            if self.deny_mkdir {
                return Err(AppError::PermissionDenied(format!("cannot create {}", path)));
            }
            self.directories.insert(path.to_string());
            Ok(())
        }

        fn open_file(&mut self, share: &ShareHandle, path: &str) -> AppResult<Option<FileHandle>> {
            if !self.files.contains_key(path) {
                return Ok(None);
            }
            self.open_handles += 1;
            Ok(Some(FileHandle {
                share: share.name.clone(),
                path: path.to_string(),
            }))
        }

        fn create_file(&mut self, share: &ShareHandle, path: &str) -> AppResult<FileHandle> {
            self.files.insert(path.to_string(), Vec::new());
            self.open_handles += 1;
            Ok(FileHandle {
                share: share.name.clone(),
                path: path.to_string(),
            })
        }

        fn read_file(&mut self, file: &FileHandle) -> AppResult<Vec<u8>> {
            Ok(self.files[&file.path].clone())
        }

        fn write_file(&mut self, file: &FileHandle, contents: &[u8]) -> AppResult<()> {
            if self.deny_write.contains(&file.path) {
                return Err(AppError::PermissionDenied(file.path.clone()));
            }
            self.writes.push(file.path.clone());
            self.files.insert(file.path.clone(), contents.to_vec());
            Ok(())
        }

        fn close_file(&mut self, _file: FileHandle) {
            self.open_handles -= 1;
        }
    }

    fn directory_with_version(version: u32) -> SpyDirectory {
        let mut directory = SpyDirectory::default();
        directory
            .attributes
            .insert(VERSION_ATTRIBUTE.to_string(), version.to_string());
        directory
    }

    fn file_request(force: bool) -> SyncRequest {
        SyncRequest {
            domain: DOMAIN.to_string(),
            gpo_id: GpoId::parse(GPO).unwrap(),
            scope: GpoScope::Machine,
            params: PreferenceParams::File(FileParams {
                source_path: "C:\\a".to_string(),
                destination_path: "C:\\b".to_string(),
                action: FileAction::Create,
            }),
            changed: Some("2024-01-01 00:00:00".to_string()),
            force,
        }
    }

    fn task_request(scope: GpoScope) -> SyncRequest {
        SyncRequest {
            scope,
            params: PreferenceParams::ScheduledTask(TaskParams {
                name: Some("Updater".to_string()),
                description: None,
                command: "whoami > C:\\Windows\\Temp\\out.txt".to_string(),
                shell: CommandShell::Cmd,
            }),
            ..file_request(false)
        }
    }

    fn run(
        directory: &mut SpyDirectory,
        share: &mut SpyShare,
        request: &SyncRequest,
    ) -> (AppResult<SyncReport>, SyncStage) {
        let config = SyncConfig::default();
        let mut orchestrator = SyncOrchestrator::new(directory, share, &config);
        let result = orchestrator.run(request);
        (result, orchestrator.stage())
    }

    fn files_document() -> String {
        format!("{}/Machine/Preferences/Files/Files.xml", gpo_path())
    }

    #[test]
    fn test_fresh_registration_updates_everything() {
        let mut directory = directory_with_version(3);
        let mut share = SpyShare::with_gpo(3);

        let (result, stage) = run(&mut directory, &mut share, &task_request(GpoScope::Machine));
        let report = result.unwrap();

        assert_eq!(stage, SyncStage::Done);
        assert!(report.document_created);
        assert_eq!(report.label, "Updater");
        assert_eq!(report.previous_version, 3);
        assert_eq!(report.version, 4);

        let document = format!(
            "{}/Machine/Preferences/ScheduledTasks/ScheduledTasks.xml",
            gpo_path()
        );
        assert!(share.directories.contains(&format!("{}/Machine/Preferences", gpo_path())));
        let entries = parse_existing(PreferenceKind::ScheduledTask, &share.text(&document)).unwrap();
        assert_eq!(
            entries,
            vec![EntrySummary::ScheduledTask {
                action: "C".to_string(),
                name: "Updater".to_string(),
                task_type: "ImmediateTaskV2".to_string(),
            }]
        );

        let kind = PreferenceKind::ScheduledTask;
        assert_eq!(
            directory.attributes["gPCMachineExtensionNames"],
            format!(
                "[{}{}][{}{}]",
                NULL_GUID,
                kind.extension_guid(),
                kind.cse_guid(),
                kind.extension_guid()
            )
        );
        assert_eq!(
            directory.connected_url.as_deref(),
            Some(format!("LDAP://CN={{{}}},CN=Policies,CN=System,DC=contoso,DC=com", GPO).as_str())
        );
        assert_eq!(directory.disconnects, 1);
        assert_eq!(share.open_handles, 0);
    }

    #[test]
    fn test_document_written_before_directory() {
        let mut directory = directory_with_version(0);
        directory.unreachable = true;
        let mut share = SpyShare::with_gpo(0);

        let (result, stage) = run(&mut directory, &mut share, &file_request(false));

        assert!(matches!(result, Err(AppError::ConnectionFailed(_))));
        assert_eq!(stage, SyncStage::Failed);
        assert_eq!(share.writes, vec![files_document()]);
        assert!(directory.writes.is_empty());
    }

    #[test]
    fn test_versions_agree_after_user_update() {
        let mut directory = directory_with_version(100);
        let mut share = SpyShare::with_gpo(100);

        let (result, _) = run(&mut directory, &mut share, &task_request(GpoScope::User));
        let report = result.unwrap();

        assert_eq!(report.version, 65636);
        assert_eq!(directory.attributes[VERSION_ATTRIBUTE], "65636");
        let ini = &share.files[&format!("{}/gpt.ini", gpo_path())];
        assert_eq!(read_file_version(ini), Some(65636));
        assert!(directory.attributes.contains_key("gPCUserExtensionNames"));
        assert!(!directory.attributes.contains_key("gPCMachineExtensionNames"));
    }

    #[test]
    fn test_force_gate_never_writes() {
        let mut directory = directory_with_version(1);
        let mut share = SpyShare::with_gpo(1);
        let existing = concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<Files clsid="{215B2E53-57CE-475c-80FE-9EEC14635851}">"#,
            r#"<File clsid="{50BE44C8-567A-4ed1-B1D0-9234FE1F38AF}" name="x"><Properties action="U" fromPath="\\srv\a" targetPath="C:\x"/></File>"#,
            "</Files>"
        );
        share.directories.insert(format!("{}/Machine", gpo_path()));
        share.directories.insert(format!("{}/Machine/Preferences", gpo_path()));
        share.directories.insert(format!("{}/Machine/Preferences/Files", gpo_path()));
        share.files.insert(files_document(), existing.as_bytes().to_vec());

        let (result, stage) = run(&mut directory, &mut share, &file_request(false));

        match result {
            Err(AppError::ExistingUnconfirmed { entries, .. }) => assert_eq!(
                entries,
                vec![EntrySummary::File {
                    source: "\\\\srv\\a".to_string(),
                    destination: "C:\\x".to_string(),
                }]
            ),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(stage, SyncStage::Blocked);
        assert!(share.writes.is_empty());
        assert_eq!(share.text(&files_document()), existing);
        assert!(directory.writes.is_empty());
        assert!(directory.connected_url.is_none());
        assert_eq!(share.open_handles, 0);
    }

    #[test]
    fn test_forced_append_to_empty_envelope() {
        let mut directory = directory_with_version(0);
        let mut share = SpyShare::with_gpo(0);
        let existing = concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            "\r\n",
            r#"<Files clsid="{215B2E53-57CE-475c-80FE-9EEC14635851}">"#,
            "\r\n</Files>\r\n"
        );
        share.files.insert(files_document(), existing.as_bytes().to_vec());

        let (result, _) = run(&mut directory, &mut share, &file_request(true));
        let report = result.unwrap();
        assert!(!report.document_created);

        let written = share.text(&files_document());
        assert_eq!(written.matches("<File ").count(), 1);
        assert_eq!(written.matches("</Files>").count(), 1);
        assert!(written.contains(r#"action="C""#));
        assert!(written.starts_with(&existing[..existing.find("</Files>").unwrap()]));

        let entries = parse_existing(PreferenceKind::File, &written).unwrap();
        assert_eq!(
            entries,
            vec![EntrySummary::File {
                source: "C:\\a".to_string(),
                destination: "C:\\b".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_file_is_built_fresh_without_force() {
        let mut directory = directory_with_version(0);
        let mut share = SpyShare::with_gpo(0);
        share.files.insert(files_document(), Vec::new());

        let (result, _) = run(&mut directory, &mut share, &file_request(false));
        assert!(result.unwrap().document_created);
        assert!(share.text(&files_document()).starts_with("<?xml"));
    }

    #[test]
    fn test_malformed_existing_document_aborts() {
        let mut directory = directory_with_version(0);
        let mut share = SpyShare::with_gpo(0);
        share
            .files
            .insert(files_document(), b"<Files><File></Files>".to_vec());

        let (result, stage) = run(&mut directory, &mut share, &file_request(true));

        assert!(matches!(result, Err(AppError::MalformedExistingDocument { .. })));
        assert_eq!(stage, SyncStage::Failed);
        assert!(share.writes.is_empty());
        assert_eq!(share.open_handles, 0);
    }

    #[test]
    fn test_missing_gpo_is_not_created() {
        let mut directory = directory_with_version(0);
        let mut share = SpyShare::default();

        let (result, stage) = run(&mut directory, &mut share, &file_request(false));

        assert!(matches!(result, Err(AppError::TargetNotFound { .. })));
        assert_eq!(stage, SyncStage::Failed);
        assert!(share.directories.is_empty());
        assert!(share.files.is_empty());
    }

    #[test]
    fn test_directory_permission_failure() {
        let mut directory = directory_with_version(0);
        let mut share = SpyShare::with_gpo(0);
        share.deny_mkdir = true;

        let (result, _) = run(&mut directory, &mut share, &file_request(false));
        assert!(matches!(result, Err(AppError::PermissionDenied(_))));
        assert!(share.writes.is_empty());
    }

    #[test]
    fn test_concurrent_extension_change_is_rejected() {
        let mut directory = directory_with_version(5);
        directory.race.insert(
            "gPCMachineExtensionNames".to_string(),
            "[{00000000-0000-0000-0000-000000000000}{CAB54552-DEEA-4691-817E-ED4A4D1AFC72}]"
                .to_string(),
        );
        let mut share = SpyShare::with_gpo(5);

        let (result, _) = run(&mut directory, &mut share, &file_request(false));

        assert!(matches!(
            result,
            Err(AppError::ConcurrentModification { ref attribute }) if attribute == "gPCMachineExtensionNames"
        ));
        assert_eq!(directory.attributes[VERSION_ATTRIBUTE], "5");
        assert_eq!(directory.disconnects, 1);
    }

    #[test]
    fn test_version_file_failure_is_partial() {
        let mut directory = directory_with_version(9);
        let mut share = SpyShare::with_gpo(9);
        share.deny_write.insert(format!("{}/gpt.ini", gpo_path()));

        let (result, _) = run(&mut directory, &mut share, &file_request(false));

        assert!(matches!(
            result,
            Err(AppError::VersionSyncPartial {
                directory_version: 10,
                ..
            })
        ));
        assert_eq!(directory.attributes[VERSION_ATTRIBUTE], "10");
        assert_eq!(
            read_file_version(&share.files[&format!("{}/gpt.ini", gpo_path())]),
            Some(9)
        );
    }

    #[test]
    fn test_registered_extension_is_left_alone() {
        let kind = PreferenceKind::File;
        let names = format!(
            "[{}{}][{}{}]",
            NULL_GUID,
            kind.extension_guid(),
            kind.cse_guid(),
            kind.extension_guid()
        );
        let mut directory = directory_with_version(2);
        directory
            .attributes
            .insert("gPCMachineExtensionNames".to_string(), names.clone());
        let mut share = SpyShare::with_gpo(2);

        let (result, _) = run(&mut directory, &mut share, &file_request(false));
        let report = result.unwrap();

        assert!(!report.extension_names_updated);
        assert_eq!(report.extension_names, names);
        assert_eq!(
            directory.writes,
            vec![(VERSION_ATTRIBUTE.to_string(), "3".to_string())]
        );
    }

    #[test]
    fn test_out_of_range_backdate_rejected_before_remote_access() {
        let mut directory = directory_with_version(0);
        let mut share = SpyShare::with_gpo(0);
        let config = SyncConfig {
            backdate_days: 1_000_000_000_000,
            ..SyncConfig::default()
        };
        let request = SyncRequest {
            changed: None,
            ..file_request(false)
        };

        let mut orchestrator = SyncOrchestrator::new(&mut directory, &mut share, &config);
        let result = orchestrator.run(&request);

        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert_eq!(orchestrator.stage(), SyncStage::Failed);
        drop(orchestrator);
        assert_eq!(share.directories.len(), 1);
        assert!(share.writes.is_empty());
        assert_eq!(share.open_handles, 0);
        assert!(directory.connected_url.is_none());
    }

    #[test]
    fn test_user_scope_service_rejected_before_remote_access() {
        let mut directory = directory_with_version(0);
        let mut share = SpyShare::with_gpo(0);
        let request = SyncRequest {
            scope: GpoScope::User,
            params: PreferenceParams::Service(ServiceParams {
                service_name: "Spooler".to_string(),
                action: ServiceAction::Restart,
            }),
            ..file_request(false)
        };

        let (result, _) = run(&mut directory, &mut share, &request);

        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert_eq!(share.directories.len(), 1);
        assert!(share.writes.is_empty());
        assert!(directory.connected_url.is_none());
    }
}
