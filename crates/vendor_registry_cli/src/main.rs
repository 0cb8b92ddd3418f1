//! Operator CLI for the vendor name registry.
//!
//! # Responsibility
//! - Run the case-insensitive name index migration out-of-band.
//! - Report duplicate names that block it.
//! - Offer thin register/rename/lookup/list commands for manual repair.
//!
//! # Invariants
//! - Successful migrations print nothing.
//! - Failures exit non-zero with the storage error text unmodified.

use clap::{Parser, Subcommand};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;
use vendor_registry_core::db::migrations::{current_version, latest_version};
use vendor_registry_core::db::open_configured;
use vendor_registry_core::{
    default_log_level, downgrade, enforcement_state, init_logging, init_stderr_logging,
    scan_duplicate_names, upgrade, ConfigError, DbError, DuplicateNameGroup, RegistryConfig,
    RegistryError, SqliteVendorRepository, VendorListQuery, VendorRegistry, VendorStatus,
};

const CLI_CLIENT_ID: &str = "vendor-registry-cli";
const CLI_DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser, Debug)]
#[command(name = "vendor-registry", version)]
#[command(about = "Case-insensitive vendor name registry")]
struct Cli {
    /// Database file; overrides config file and environment
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level; overrides config file and environment
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Move name enforcement between schema versions
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// List rows whose names collide once lower-cased
    ScanDuplicates,
    /// Register a vendor and print its id
    Register {
        name: String,
        /// Client identifier recorded as the creator
        #[arg(long, value_name = "CLIENT")]
        created_by: Option<String>,
    },
    /// Rename a vendor by id
    Rename { id: Uuid, name: String },
    /// Print the id owning a name, compared case-insensitively
    Lookup { name: String },
    /// List vendors ordered by normalized name
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<VendorStatus>,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateAction {
    /// Install the case-insensitive unique index
    Up,
    /// Restore the exact-match unique index
    Down,
    /// Print schema version and live name enforcement
    Status,
}

#[derive(Debug)]
enum CliError {
    Config(ConfigError),
    Logging(String),
    Db(DbError),
    Registry(RegistryError),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(message) => write!(f, "logging: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Logging(_) => None,
            Self::Db(err) => Some(err),
            Self::Registry(err) => Some(err),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for CliError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RegistryError> for CliError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            if let CliError::Db(DbError::MigrationPrecondition(precondition)) = &err {
                print_duplicates(&precondition.duplicates, true);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let mut config = RegistryConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    init_cli_logging(&config, cli.log_level.as_deref())?;
    info!(
        "event=cli_start module=cli status=ok version={}",
        vendor_registry_core::core_version()
    );

    match cli.command {
        Command::Migrate { action } => {
            let mut conn = open_configured(&config, false)?;
            match action {
                MigrateAction::Up => {
                    upgrade(&mut conn)?;
                }
                MigrateAction::Down => {
                    downgrade(&mut conn)?;
                }
                MigrateAction::Status => {
                    println!(
                        "schema_version={} latest={} enforcement={}",
                        current_version(&conn)?,
                        latest_version(),
                        enforcement_state(&conn)?
                    );
                }
            }
        }
        Command::ScanDuplicates => {
            let conn = open_configured(&config, false)?;
            let groups = scan_duplicate_names(&conn)?;
            print_duplicates(&groups, false);
            if !groups.is_empty() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Register { name, created_by } => {
            let conn = open_configured(&config, true)?;
            let client = created_by.unwrap_or_else(|| CLI_CLIENT_ID.to_string());
            let registry = VendorRegistry::with_client(SqliteVendorRepository::new(&conn), client);
            println!("{}", registry.register(&name)?);
        }
        Command::Rename { id, name } => {
            let conn = open_configured(&config, true)?;
            let registry = VendorRegistry::new(SqliteVendorRepository::new(&conn));
            let vendor = registry.rename(id, &name)?;
            println!("{} version={}", vendor.id, vendor.version);
        }
        Command::Lookup { name } => {
            let conn = open_configured(&config, true)?;
            let registry = VendorRegistry::new(SqliteVendorRepository::new(&conn));
            match registry.lookup(&name)? {
                Some(id) => println!("{id}"),
                None => {
                    eprintln!("vendor not found");
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Command::List { status } => {
            let conn = open_configured(&config, true)?;
            let registry = VendorRegistry::new(SqliteVendorRepository::new(&conn));
            let query = VendorListQuery {
                status,
                ..VendorListQuery::default()
            };
            for vendor in registry.list(&query)? {
                println!(
                    "{}\t{}\t{}\tversion={}",
                    vendor.id,
                    vendor.name,
                    vendor.status.as_str(),
                    vendor.version
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_cli_logging(config: &RegistryConfig, level_flag: Option<&str>) -> Result<(), CliError> {
    let result = match &config.log_dir {
        Some(dir) => init_logging(
            resolve_log_level(config, level_flag, default_log_level()),
            &dir.to_string_lossy(),
        ),
        None => init_stderr_logging(resolve_log_level(config, level_flag, CLI_DEFAULT_LOG_LEVEL)),
    };
    result.map_err(CliError::Logging)
}

/// Flag first, then file/env config, then the sink's own default.
fn resolve_log_level<'a>(
    config: &'a RegistryConfig,
    level_flag: Option<&'a str>,
    sink_default: &'a str,
) -> &'a str {
    level_flag.unwrap_or_else(|| config.log_level_or(sink_default))
}

fn print_duplicates(groups: &[DuplicateNameGroup], to_stderr: bool) {
    for group in groups {
        let members = group
            .members
            .iter()
            .map(|member| format!("{} ({})", member.name, member.id))
            .collect::<Vec<_>>()
            .join(", ");
        if to_stderr {
            eprintln!("  {}: {}", group.normalized_name, members);
        } else {
            println!("{}: {}", group.normalized_name, members);
        }
    }
}

fn parse_status(value: &str) -> Result<VendorStatus, String> {
    VendorStatus::parse(&value.trim().to_ascii_lowercase())
        .ok_or_else(|| format!("unknown status `{value}`; expected operational|broken"))
}

#[cfg(test)]
mod tests {
    use super::{resolve_log_level, Cli, Command, MigrateAction, CLI_DEFAULT_LOG_LEVEL};
    use clap::{CommandFactory, Parser};
    use vendor_registry_core::config::ENV_LOG_LEVEL;
    use vendor_registry_core::{RegistryConfig, VendorStatus};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_up_with_global_db_flag() {
        let cli = Cli::try_parse_from(["vendor-registry", "migrate", "up", "--db", "/tmp/v.db"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Migrate {
                action: MigrateAction::Up
            }
        ));
        assert_eq!(cli.db.unwrap().to_str(), Some("/tmp/v.db"));
    }

    #[test]
    fn list_status_filter_is_case_insensitive() {
        let cli = Cli::try_parse_from(["vendor-registry", "list", "--status", "Operational"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::List {
                status: Some(VendorStatus::Operational)
            }
        ));
    }

    #[test]
    fn configured_log_level_applies_without_a_flag() {
        let config = RegistryConfig::default()
            .with_overrides(|key| (key == ENV_LOG_LEVEL).then(|| "error".to_string()))
            .unwrap();

        assert_eq!(
            resolve_log_level(&config, None, CLI_DEFAULT_LOG_LEVEL),
            "error"
        );
        assert_eq!(
            resolve_log_level(&config, Some("debug"), CLI_DEFAULT_LOG_LEVEL),
            "debug"
        );
        assert_eq!(
            resolve_log_level(&RegistryConfig::default(), None, CLI_DEFAULT_LOG_LEVEL),
            "warn"
        );
    }

    #[test]
    fn rename_rejects_malformed_id() {
        assert!(Cli::try_parse_from(["vendor-registry", "rename", "nope", "Acme"]).is_err());
    }
}
