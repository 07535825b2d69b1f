//! Preference item types
//!
//! The three preference kinds this crate can register, their protocol-fixed
//! identifiers, the caller parameters for a new entry and the summaries shown
//! for entries already present in a document.

use chrono::{Local, TimeDelta};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::gpo::GpoScope;
use crate::error::{AppError, AppResult};

/// GUID that heads the group of tool extensions without a client-side extension
pub const NULL_GUID: &str = "{00000000-0000-0000-0000-000000000000}";

/// Timestamp layout of the `changed` attribute
pub const CHANGED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Preference document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PreferenceKind {
    ScheduledTask,
    File,
    Service,
}

impl PreferenceKind {
    /// Get all kinds
    pub fn all() -> &'static [PreferenceKind] {
        &[
            PreferenceKind::ScheduledTask,
            PreferenceKind::File,
            PreferenceKind::Service,
        ]
    }

    /// Client-side extension that processes this document on the target
    pub fn cse_guid(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "{AADCED64-746C-4633-A97C-D61349046527}",
            PreferenceKind::File => "{7150F9BF-48AD-4DA4-A49C-29EF4A8369BA}",
            PreferenceKind::Service => "{91FBB303-0CD5-4055-BF42-E512A681B325}",
        }
    }

    /// Editor extension paired with the CSE in the extension list
    pub fn extension_guid(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "{CAB54552-DEEA-4691-817E-ED4A4D1AFC72}",
            PreferenceKind::File => "{3BAE7E51-E3F4-41D0-853D-9BB9FD47605F}",
            PreferenceKind::Service => "{CC5746A9-9B74-4be5-AE2E-64379C86E0E4}",
        }
    }

    /// Root element of the document
    pub fn envelope_tag(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "ScheduledTasks",
            PreferenceKind::File => "Files",
            PreferenceKind::Service => "NTServices",
        }
    }

    pub fn envelope_clsid(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "{CC63F200-7309-4ba0-B154-A71CD118DBCC}",
            PreferenceKind::File => "{215B2E53-57CE-475c-80FE-9EEC14635851}",
            PreferenceKind::Service => "{2CFB484A-4E96-4b5d-A0B6-093D2F91E6AE}",
        }
    }

    /// Element written for each new entry
    pub fn entry_tag(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "ImmediateTaskV2",
            PreferenceKind::File => "File",
            PreferenceKind::Service => "NTService",
        }
    }

    pub fn entry_clsid(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "{9756B581-76EC-4169-9AFC-0CA8D43ADB5F}",
            PreferenceKind::File => "{50BE44C8-567A-4ed1-B1D0-9234FE1F38AF}",
            PreferenceKind::Service => "{AB6F0B67-341F-4e51-92F9-005FBFBA1A43}",
        }
    }

    /// Folder below `Preferences`, also the document's base name
    pub fn folder(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "ScheduledTasks",
            PreferenceKind::File => "Files",
            PreferenceKind::Service => "Services",
        }
    }

    pub fn document_name(&self) -> &'static str {
        match self {
            PreferenceKind::ScheduledTask => "ScheduledTasks.xml",
            PreferenceKind::File => "Files.xml",
            PreferenceKind::Service => "Services.xml",
        }
    }

    /// Folder path relative to the GPO root, one component per element
    pub fn directory_components(&self, scope: GpoScope) -> [&'static str; 3] {
        [scope.folder(), "Preferences", self.folder()]
    }

    /// Whether the kind can be registered under the given scope
    pub fn supports_scope(&self, scope: GpoScope) -> bool {
        !matches!((self, scope), (PreferenceKind::Service, GpoScope::User))
    }
}

impl fmt::Display for PreferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceKind::ScheduledTask => write!(f, "scheduled task"),
            PreferenceKind::File => write!(f, "file"),
            PreferenceKind::Service => write!(f, "service"),
        }
    }
}

/// File preference actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileAction {
    Create,
    Replace,
    Update,
    Delete,
}

impl FileAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "create" | "c" => Some(FileAction::Create),
            "replace" | "r" => Some(FileAction::Replace),
            "update" | "u" => Some(FileAction::Update),
            "delete" | "d" => Some(FileAction::Delete),
            _ => None,
        }
    }

    /// Single-letter code stored in the `action` attribute
    pub fn code(&self) -> &'static str {
        match self {
            FileAction::Create => "C",
            FileAction::Replace => "R",
            FileAction::Update => "U",
            FileAction::Delete => "D",
        }
    }
}

/// Service preference actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceAction {
    Start,
    Restart,
    Stop,
}

impl ServiceAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "start" => Some(ServiceAction::Start),
            "restart" => Some(ServiceAction::Restart),
            "stop" => Some(ServiceAction::Stop),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceAction::Start => "START",
            ServiceAction::Restart => "RESTART",
            ServiceAction::Stop => "STOP",
        }
    }
}

/// How a task's command line is launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandShell {
    #[default]
    Cmd,
    PowerShell,
}

impl CommandShell {
    /// Executable and argument string for the task's `Exec` action
    pub fn wrap(&self, command: &str) -> (&'static str, String) {
        match self {
            CommandShell::Cmd => ("c:\\windows\\system32\\cmd.exe", format!("/c {}", command)),
            CommandShell::PowerShell => (
                "powershell.exe",
                format!("-NoProfile -NonInteractive -Command \"{}\"", command),
            ),
        }
    }
}

/// Caller parameters for a new scheduled task entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    /// Defaults to `TASK_<8 hex>` when absent
    pub name: Option<String>,
    pub description: Option<String>,
    pub command: String,
    pub shell: CommandShell,
}

/// Caller parameters for a new file entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParams {
    pub source_path: String,
    pub destination_path: String,
    pub action: FileAction,
}

/// Caller parameters for a new service entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceParams {
    pub service_name: String,
    pub action: ServiceAction,
}

/// Kind-specific parameters for one new preference entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PreferenceParams {
    ScheduledTask(TaskParams),
    File(FileParams),
    Service(ServiceParams),
}

impl PreferenceParams {
    pub fn kind(&self) -> PreferenceKind {
        match self {
            PreferenceParams::ScheduledTask(_) => PreferenceKind::ScheduledTask,
            PreferenceParams::File(_) => PreferenceKind::File,
            PreferenceParams::Service(_) => PreferenceKind::Service,
        }
    }
}

/// Identity and timestamp shared by every generated entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStamp {
    /// Braced uppercase GUID
    pub uid: String,
    /// `YYYY-MM-DD HH:MM:SS`, or whatever the caller passed through
    pub changed: String,
}

impl EntryStamp {
    /// Fresh uid; `changed` is the override if given, else now minus `backdate_days`.
    ///
    /// Fails when `backdate_days` does not yield a representable date.
    pub fn new(changed: Option<&str>, backdate_days: i64) -> AppResult<Self> {
        let changed = match changed {
            Some(value) => value.to_string(),
            None => TimeDelta::try_days(backdate_days)
                .and_then(|age| Local::now().checked_sub_signed(age))
                .ok_or_else(|| {
                    AppError::InvalidArgument(format!(
                        "backdate of {} days is out of range",
                        backdate_days
                    ))
                })?
                .format(CHANGED_FORMAT)
                .to_string(),
        };

        Ok(Self {
            uid: format!("{{{}}}", uuid::Uuid::new_v4().to_string().to_uppercase()),
            changed,
        })
    }
}

/// Default task name, `TASK_` plus the first block of a random GUID
pub fn default_task_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("TASK_{}", &id[..8])
}

/// Last component of a Windows path (`C:\dir\file.txt` -> `file.txt`)
pub fn windows_file_name(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Human-readable summary of an entry found in an existing document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntrySummary {
    ScheduledTask {
        /// C, U, D or R
        action: String,
        name: String,
        /// Element name, e.g. `ImmediateTaskV2`
        task_type: String,
    },
    File {
        source: String,
        destination: String,
    },
    Service {
        service_name: String,
    },
}

impl fmt::Display for EntrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySummary::ScheduledTask {
                action,
                name,
                task_type,
            } => write!(f, "[{}] {} (Type: {})", action, name, task_type),
            EntrySummary::File {
                source,
                destination,
            } => write!(f, "src: {} dst: {}", source, destination),
            EntrySummary::Service { service_name } => write!(f, "service name: {}", service_name),
        }
    }
}
