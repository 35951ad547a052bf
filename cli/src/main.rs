//! `mailsweep` command-line entry point.
//!
//! Loads configuration, opens the configured store once and runs one of
//! the catalog, report or delete modes against it.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, CommandFactory, Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mailsweep::config::{default_max_connections, default_sqlite_path, validate_config};
use mailsweep::runner::{self, Engine};
use mailsweep::worker::PoolReport;
use mailsweep::{load_config, store, Config, ConfigError, GmailClient, StoreConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum StoreKind {
    Sqlite,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(
    name = "mailsweep",
    version,
    about = "Catalog a mailbox, report its top senders and bulk-delete by sender",
    group(ArgGroup::new("mode").args(["catalog", "report", "delete_from"]))
)]
struct Cli {
    /// List every thread and fetch its sender, recipient and date.
    #[arg(long)]
    catalog: bool,

    /// Print the most frequent senders of fetched threads as CSV.
    #[arg(long)]
    report: bool,

    /// Delete every fetched thread sent by ADDRESS.
    #[arg(long, value_name = "ADDRESS")]
    delete_from: Option<String>,

    /// Number of concurrent fetch or delete workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Storage backend.
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// PostgreSQL connection URL.
    #[arg(long)]
    database_url: Option<String>,

    /// Path to the YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Move records stranded by an interrupted run back before starting.
    #[arg(long)]
    requeue_stale: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Catalog,
    Report,
    Delete(String),
}

impl Cli {
    fn mode(&self) -> Option<Mode> {
        if self.catalog {
            Some(Mode::Catalog)
        } else if self.report {
            Some(Mode::Report)
        } else {
            self.delete_from.clone().map(Mode::Delete)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(mode) = cli.mode() else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    if let Err(err) = init_tracing(cli.log_format) {
        eprintln!("failed to init logging: {err}");
        return ExitCode::FAILURE;
    }

    match run(&cli, mode) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when workers failed under the continue policy.
fn run(cli: &Cli, mode: Mode) -> mailsweep::Result<bool> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    apply_overrides(cli, &mut config)?;
    validate_config(&config)?;

    let backend = store::open(&config.store)?;
    info!("Store opened");

    if cli.requeue_stale || config.requeue_stale {
        runner::requeue_stale(backend.jobs.as_ref())?;
    }

    match mode {
        Mode::Report => {
            let mut out = io::stdout().lock();
            runner::report(backend.jobs.as_ref(), config.report_limit, &mut out)?;
            Ok(true)
        }
        Mode::Catalog => {
            let mailbox = GmailClient::from_config(&config.mailbox)?;
            let summary = Engine::new(&backend, Arc::new(mailbox), config).catalog()?;
            Ok(all_workers_succeeded(&summary.fetch))
        }
        Mode::Delete(sender) => {
            let mailbox = GmailClient::from_config(&config.mailbox)?;
            let report = Engine::new(&backend, Arc::new(mailbox), config).delete_from(&sender)?;
            Ok(all_workers_succeeded(&report))
        }
    }
}

fn all_workers_succeeded(report: &PoolReport) -> bool {
    for failure in &report.failures {
        warn!("Worker {} failed: {}", failure.worker_id, failure.error);
    }
    report.failures.is_empty()
}

/// Merges command-line flags over the file configuration.
fn apply_overrides(cli: &Cli, config: &mut Config) -> Result<(), ConfigError> {
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    let kind = cli.store.or_else(|| {
        if cli.database_url.is_some() {
            Some(StoreKind::Postgres)
        } else if cli.db_path.is_some() {
            Some(StoreKind::Sqlite)
        } else {
            None
        }
    });

    match kind {
        None => {}
        Some(StoreKind::Sqlite) => {
            let path = match (&cli.db_path, &config.store) {
                (Some(path), _) => path.clone(),
                (None, StoreConfig::Sqlite { path }) => path.clone(),
                (None, StoreConfig::Postgres { .. }) => default_sqlite_path(),
            };
            config.store = StoreConfig::Sqlite { path };
        }
        Some(StoreKind::Postgres) => {
            let (url, max_connections) = match (&cli.database_url, &config.store) {
                (Some(url), StoreConfig::Postgres {
                    max_connections, ..
                }) => (url.clone(), *max_connections),
                (Some(url), StoreConfig::Sqlite { .. }) => {
                    (url.clone(), default_max_connections())
                }
                (None, StoreConfig::Postgres {
                    url,
                    max_connections,
                }) => (url.clone(), *max_connections),
                (None, StoreConfig::Sqlite { .. }) => {
                    return Err(ConfigError::Validation {
                        message: "--store postgres needs --database-url or store.url".to_string(),
                    });
                }
            };
            config.store = StoreConfig::Postgres {
                url,
                max_connections,
            };
        }
    }

    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr);

    match log_format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    // The library logs through the `log` facade.
    tracing_log::LogTracer::init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mailsweep").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_modes_are_exclusive() {
        assert!(Cli::try_parse_from(["mailsweep", "--catalog", "--report"]).is_err());
        assert!(
            Cli::try_parse_from(["mailsweep", "--report", "--delete-from", "a@x.com"]).is_err()
        );
        assert_eq!(parse(&["--catalog"]).mode(), Some(Mode::Catalog));
        assert_eq!(
            parse(&["--delete-from", "a@x.com"]).mode(),
            Some(Mode::Delete("a@x.com".to_string()))
        );
        assert_eq!(parse(&[]).mode(), None);
    }

    #[test]
    fn test_workers_override() {
        let mut config = Config::default();
        apply_overrides(&parse(&["--report", "--workers", "6"]), &mut config).unwrap();
        assert_eq!(config.workers, 6);
    }

    #[test]
    fn test_db_path_selects_sqlite() {
        let mut config = Config::default();
        apply_overrides(&parse(&["--db-path", "/tmp/x.db"]), &mut config).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("/tmp/x.db")
            }
        );
    }

    #[test]
    fn test_database_url_selects_postgres() {
        let mut config = Config::default();
        apply_overrides(
            &parse(&["--database-url", "postgres://localhost/mail"]),
            &mut config,
        )
        .unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                url: "postgres://localhost/mail".to_string(),
                max_connections: default_max_connections(),
            }
        );
    }

    #[test]
    fn test_postgres_without_url_is_rejected() {
        let mut config = Config::default();
        let result = apply_overrides(&parse(&["--store", "postgres"]), &mut config);
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_file_config_keeps_postgres_pool_size() {
        let mut config = mailsweep::config::load_config_from_str(
            "store:\n  backend: postgres\n  url: postgres://old\n  max_connections: 3\n",
        )
        .unwrap();
        apply_overrides(&parse(&["--database-url", "postgres://new"]), &mut config).unwrap();
        assert_eq!(
            config.store,
            StoreConfig::Postgres {
                url: "postgres://new".to_string(),
                max_connections: 3,
            }
        );
    }

    #[test]
    fn test_report_mode_against_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("m.db");
        let cli = parse(&["--report", "--db-path", db_path.to_str().unwrap()]);
        assert!(run(&cli, Mode::Report).unwrap());
        assert!(db_path.exists());
    }
}
