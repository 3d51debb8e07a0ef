use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

use commands::{CliError, run_artifacts, run_backup, run_restore, run_serve, run_status};

#[derive(Parser, Debug)]
#[command(name = "strongbox", version)]
#[command(about = "Strongbox - scheduled database backups with off-site sync and automatic restore")]
struct Cli {
    /// TOML configuration file; STRONGBOX_* variables override its values
    #[arg(long, global = true, env = "STRONGBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Restore an empty datastore, then run the scheduler and the admin API
    Serve {
        /// Address for the admin API
        #[arg(long, env = "STRONGBOX_ADMIN_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Run one backup now
    Backup,
    /// Replay the newest artifact, or the one given
    Restore {
        /// Skip the restore when the datastore already has tables
        #[arg(long)]
        if_empty: bool,
        /// Replay this artifact instead of the newest one
        #[arg(long)]
        artifact: Option<PathBuf>,
    },
    /// Show datastore state and schedule
    Status,
    /// List local and remote artifacts
    Artifacts,
}

fn init_logging(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    // Command results go to stdout; logs stay on stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = cli.config.as_deref();
    let result: Result<(), CliError> = match cli.command {
        Commands::Serve { bind } => run_serve(config, bind).await,
        Commands::Backup => run_backup(config).await,
        Commands::Restore { if_empty, artifact } => {
            run_restore(config, if_empty, artifact.as_deref()).await
        }
        Commands::Status => run_status(config).await,
        Commands::Artifacts => run_artifacts(config).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, kind = e.kind(), "Command failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_restore_flags() {
        let cli = Cli::try_parse_from([
            "strongbox",
            "--log-format",
            "pretty",
            "restore",
            "--if-empty",
            "--artifact",
            "/var/backups/backup_20250101_030000.sql.gz",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Pretty);
        match cli.command {
            Commands::Restore { if_empty, artifact } => {
                assert!(if_empty);
                assert_eq!(
                    artifact,
                    Some(PathBuf::from("/var/backups/backup_20250101_030000.sql.gz"))
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_serve_bind_and_global_config() {
        let cli = Cli::try_parse_from([
            "strongbox",
            "serve",
            "--bind",
            "0.0.0.0:9090",
            "--config",
            "/etc/strongbox.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/strongbox.toml")));
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.port(), 9090),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
