//! Command-line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{add_file, add_scheduled_task, add_service, CommandContext, GpoTarget};
use crate::domain::SyncConfig;
use crate::error::{AppError, AppResult, CommandError};
use crate::infrastructure::{AdsiDirectory, SyncReport, SysvolShare};

/// Register Group Policy Preference items in an existing GPO
#[derive(Parser, Debug)]
#[command(name = "gpo-pref-sync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Target as domain/username[:password]
    pub target: String,

    /// GPO to update (GUID, braces optional)
    #[arg(long, env = "GPO_SYNC_GPO_ID")]
    pub gpo_id: String,

    /// GPO half to modify
    #[arg(long, default_value = "Machine", value_parser = ["Machine", "User"])]
    pub gpo_type: String,

    /// Domain controller IP or hostname
    #[arg(long, env = "GPO_SYNC_DC")]
    pub dc_ip: Option<String>,

    /// Use LDAPS instead of LDAP
    #[arg(long)]
    pub ldaps: bool,

    /// Root holding the policy share (default: \\<dc-ip or domain>)
    #[arg(long, env = "GPO_SYNC_SYSVOL_ROOT")]
    pub sysvol_root: Option<PathBuf>,

    /// Share hosting the policy folders
    #[arg(long, env = "GPO_SYNC_SHARE", default_value = "SYSVOL")]
    pub share_name: String,

    /// Age in days given to new entries without --mod-date
    #[arg(
        long,
        env = "GPO_SYNC_BACKDATE_DAYS",
        default_value_t = 30,
        value_parser = clap::value_parser!(i64).range(0..=36500)
    )]
    pub backdate_days: i64,

    /// Verbosity level (-v or -vv)
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[arg(long, env = "GPO_SYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add an immediate scheduled task
    ScheduledTask {
        /// Task name (default: TASK_<random>)
        #[arg(long)]
        taskname: Option<String>,

        /// Task description
        #[arg(long)]
        description: Option<String>,

        /// Run the command through PowerShell instead of cmd.exe
        #[arg(long)]
        powershell: bool,

        /// Command to execute
        #[arg(long)]
        command: String,

        /// Entry modification date (default: 30 days before now)
        #[arg(long)]
        mod_date: Option<String>,

        /// Append even if the document already has entries
        #[arg(short, long)]
        force: bool,
    },

    /// Add a file copy entry
    File {
        /// Source file path to be copied
        #[arg(short, long)]
        source_path: String,

        /// Destination file path
        #[arg(short, long)]
        destination_path: String,

        /// File action
        #[arg(short, long, value_parser = ["create", "replace", "update", "delete"])]
        action: String,

        /// Entry modification date (default: 30 days before now)
        #[arg(long)]
        mod_date: Option<String>,

        /// Append even if the document already has entries
        #[arg(short, long)]
        force: bool,
    },

    /// Add a service control entry (Machine only)
    Service {
        /// The name of the service
        #[arg(short, long)]
        service_name: String,

        /// Service action
        #[arg(short, long, value_parser = ["start", "restart", "stop"])]
        action: String,

        /// Entry modification date (default: 30 days before now)
        #[arg(long)]
        mod_date: Option<String>,

        /// Append even if the document already has entries
        #[arg(short, long)]
        force: bool,
    },
}

/// Parsed `domain/username[:password]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub domain: String,
    pub username: String,
    pub password: Option<String>,
}

/// Split a `domain/username[:password]` target
pub fn parse_target(target: &str) -> AppResult<Credentials> {
    let (domain, account) = target.split_once('/').ok_or_else(|| {
        AppError::InvalidArgument("Domain should be specified (domain/username[:password])".to_string())
    })?;

    if domain.trim().is_empty() {
        return Err(AppError::InvalidArgument("Domain should be specified!".to_string()));
    }

    let (username, password) = match account.split_once(':') {
        Some((user, password)) => (user, Some(password.to_string())),
        None => (account, None),
    };

    Ok(Credentials {
        domain: domain.trim().to_string(),
        username: username.to_string(),
        password,
    })
}

impl Cli {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            share_name: self.share_name.clone(),
            backdate_days: self.backdate_days,
            directory_server: self.dc_ip.clone(),
            ..SyncConfig::default()
        }
    }
}

/// Build the sessions for `cli` and run its sub-command
pub fn execute(cli: &Cli) -> Result<SyncReport, CommandError> {
    let credentials = parse_target(&cli.target)?;

    let username = (!credentials.username.is_empty())
        .then(|| format!("{}\\{}", credentials.domain, credentials.username));
    let directory = AdsiDirectory::new(username, credentials.password.clone(), cli.ldaps);

    let share = match &cli.sysvol_root {
        Some(root) => SysvolShare::new(root),
        None => SysvolShare::for_server(cli.dc_ip.as_deref().unwrap_or(&credentials.domain)),
    };

    let mut ctx = CommandContext::new(Box::new(directory), Box::new(share), cli.sync_config());

    let target = |mod_date: &Option<String>, force: bool| GpoTarget {
        domain: credentials.domain.clone(),
        gpo_id: cli.gpo_id.clone(),
        gpo_type: cli.gpo_type.clone(),
        mod_date: mod_date.clone(),
        force,
    };

    match &cli.command {
        Commands::ScheduledTask {
            taskname,
            description,
            powershell,
            command,
            mod_date,
            force,
        } => add_scheduled_task(
            &mut ctx,
            &target(mod_date, *force),
            taskname.clone(),
            description.clone(),
            command.clone(),
            *powershell,
        ),
        Commands::File {
            source_path,
            destination_path,
            action,
            mod_date,
            force,
        } => add_file(
            &mut ctx,
            &target(mod_date, *force),
            source_path.clone(),
            destination_path.clone(),
            action,
        ),
        Commands::Service {
            service_name,
            action,
            mod_date,
            force,
        } => add_service(&mut ctx, &target(mod_date, *force), service_name.clone(), action),
    }
}

/// Print a command outcome and return the process exit code
pub fn report(result: &Result<SyncReport, CommandError>, json: bool) -> i32 {
    match result {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        eprintln!("[-] {}", AppError::from(e));
                        return 1;
                    }
                }
            } else {
                println!(
                    "[+] {} '{}' registered in {} (version {} -> {})",
                    report.kind, report.label, report.document_path, report.previous_version, report.version
                );
            }
            0
        }
        Err(err) => {
            if json {
                match serde_json::to_string_pretty(err) {
                    Ok(text) => println!("{}", text),
                    Err(e) => eprintln!("[-] {}", AppError::from(e)),
                }
            } else {
                eprintln!("[-] {}", err.message);
                if !err.details.is_empty() {
                    eprintln!("[*] Existing entries (C: Create, U: Update, D: Delete, R: Replace):");
                    for detail in &err.details {
                        eprintln!("        {}", detail);
                    }
                }
            }
            if err.fatal {
                1
            } else {
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("contoso.com/alice:S3cr:et").unwrap(),
            Credentials {
                domain: "contoso.com".to_string(),
                username: "alice".to_string(),
                password: Some("S3cr:et".to_string()),
            }
        );
        assert_eq!(parse_target("contoso.com/alice").unwrap().password, None);
        assert!(parse_target("alice:pw").is_err());
        assert!(parse_target("/alice").is_err());
    }

    #[test]
    fn test_cli_parses_file_subcommand() {
        let cli = Cli::try_parse_from([
            "gpo-pref-sync",
            "contoso.com/alice:pw",
            "--gpo-id",
            "31B2F340-016D-11D2-945F-00C04FB984F9",
            "--gpo-type",
            "User",
            "-vv",
            "file",
            "-s",
            "\\\\srv\\share\\a.exe",
            "-d",
            "C:\\a.exe",
            "-a",
            "create",
            "-f",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.gpo_type, "User");
        match cli.command {
            Commands::File { action, force, .. } => {
                assert_eq!(action, "create");
                assert!(force);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_bounds_backdate_days() {
        let parse = |days: &str| {
            Cli::try_parse_from([
                "gpo-pref-sync",
                "contoso.com/alice",
                "--gpo-id",
                "31B2F340-016D-11D2-945F-00C04FB984F9",
                "--backdate-days",
                days,
                "service",
                "-s",
                "Spooler",
                "-a",
                "restart",
            ])
        };

        assert_eq!(parse("0").unwrap().backdate_days, 0);
        assert_eq!(parse("36500").unwrap().backdate_days, 36500);
        assert!(parse("36501").is_err());
        assert!(parse("1000000000000").is_err());
        assert!(parse("-1").is_err());
    }

    #[test]
    fn test_cli_requires_task_command() {
        let result = Cli::try_parse_from([
            "gpo-pref-sync",
            "contoso.com/alice",
            "--gpo-id",
            "31B2F340-016D-11D2-945F-00C04FB984F9",
            "scheduled-task",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_declined_write_exits_zero() {
        let declined = CommandError::from(AppError::ExistingUnconfirmed {
            document: "Files.xml".to_string(),
            entries: Vec::new(),
        });
        assert_eq!(report(&Err(declined), true), 0);

        let failed = CommandError::from(AppError::TargetNotFound {
            gpo_id: "{X}".to_string(),
            path: "p".to_string(),
        });
        assert_eq!(report(&Err(failed), true), 1);
    }
}
