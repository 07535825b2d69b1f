//! Commands for registering preference entries
//!
//! Each command validates its raw arguments, hands a request to the
//! orchestrator and returns either the report or a serializable error.

use crate::domain::{
    CommandShell, FileAction, FileParams, GpoId, GpoScope, PreferenceParams, ServiceAction,
    ServiceParams, SyncConfig, TaskParams,
};
use crate::error::{AppError, CommandError};
use crate::infrastructure::{
    DirectorySession, FileShareSession, SyncOrchestrator, SyncReport, SyncRequest,
};

/// Sessions and settings shared by the preference commands
pub struct CommandContext {
    pub directory: Box<dyn DirectorySession>,
    pub share: Box<dyn FileShareSession>,
    pub config: SyncConfig,
}

impl CommandContext {
    pub fn new(
        directory: Box<dyn DirectorySession>,
        share: Box<dyn FileShareSession>,
        config: SyncConfig,
    ) -> Self {
        Self {
            directory,
            share,
            config,
        }
    }
}

/// GPO being modified and the options common to every preference kind
#[derive(Debug, Clone)]
pub struct GpoTarget {
    pub domain: String,
    pub gpo_id: String,
    /// `Machine` or `User`
    pub gpo_type: String,
    /// Explicit `changed` timestamp
    pub mod_date: Option<String>,
    pub force: bool,
}

fn register(
    ctx: &mut CommandContext,
    target: &GpoTarget,
    params: PreferenceParams,
) -> Result<SyncReport, CommandError> {
    let scope = GpoScope::parse(&target.gpo_type).ok_or_else(|| {
        AppError::InvalidArgument(format!("Invalid GPO type: {}", target.gpo_type))
    })?;
    let gpo_id = GpoId::parse(&target.gpo_id)?;

    let request = SyncRequest {
        domain: target.domain.clone(),
        gpo_id,
        scope,
        params,
        changed: target.mod_date.clone(),
        force: target.force,
    };

    tracing::info!(
        domain = %request.domain,
        gpo_id = %request.gpo_id,
        scope = %scope,
        kind = %request.params.kind(),
        force = request.force,
        "Registering preference"
    );

    let mut orchestrator =
        SyncOrchestrator::new(ctx.directory.as_mut(), ctx.share.as_mut(), &ctx.config);
    orchestrator.run(&request).map_err(CommandError::from)
}

/// Add an immediate scheduled task
pub fn add_scheduled_task(
    ctx: &mut CommandContext,
    target: &GpoTarget,
    task_name: Option<String>,
    description: Option<String>,
    command: String,
    powershell: bool,
) -> Result<SyncReport, CommandError> {
    if command.trim().is_empty() {
        return Err(AppError::InvalidArgument("Command must not be empty".to_string()).into());
    }

    let shell = if powershell {
        CommandShell::PowerShell
    } else {
        CommandShell::Cmd
    };

    register(
        ctx,
        target,
        PreferenceParams::ScheduledTask(TaskParams {
            name: task_name,
            description,
            command,
            shell,
        }),
    )
}

/// Add a file copy / replace / update / delete entry
pub fn add_file(
    ctx: &mut CommandContext,
    target: &GpoTarget,
    source_path: String,
    destination_path: String,
    action: &str,
) -> Result<SyncReport, CommandError> {
    let action = FileAction::parse(action)
        .ok_or_else(|| AppError::InvalidArgument(format!("Invalid file action: {}", action)))?;

    register(
        ctx,
        target,
        PreferenceParams::File(FileParams {
            source_path,
            destination_path,
            action,
        }),
    )
}

/// Add a service start / restart / stop entry
pub fn add_service(
    ctx: &mut CommandContext,
    target: &GpoTarget,
    service_name: String,
    action: &str,
) -> Result<SyncReport, CommandError> {
    let action = ServiceAction::parse(action)
        .ok_or_else(|| AppError::InvalidArgument(format!("Invalid service action: {}", action)))?;

    register(
        ctx,
        target,
        PreferenceParams::Service(ServiceParams {
            service_name,
            action,
        }),
    )
}
