//! CLI argument definitions.

use clap::{Parser, Subcommand};

use domain::PERSON_TABLE;

/// x3-store - maintenance tool for the x3 persistence layer
#[derive(Parser, Debug)]
#[command(name = "x3-store")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run database migrations
    Migrate(MigrateArgs),

    /// Bulk write generated people
    Seed(SeedArgs),

    /// List stored people
    List(ListArgs),

    /// Count stored people
    Count,
}

/// Arguments for the migrate command
#[derive(Parser, Debug)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub action: MigrateAction,
}

/// Migration actions
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateAction {
    /// Run pending migrations
    Up,
    /// Rollback last migration
    Down,
    /// Show migration status
    Status,
    /// Reset and re-run all migrations
    Fresh,
}

/// Arguments for the seed command
#[derive(Parser, Debug, Clone)]
pub struct SeedArgs {
    /// Number of people to generate
    #[arg(short = 'n', long, default_value = "1000")]
    pub count: usize,

    /// Destination table
    #[arg(short, long, default_value = PERSON_TABLE)]
    pub table: String,

    /// Per-batch timeout in seconds, 0 = none
    #[arg(long, env = "BULK_WRITE_TIMEOUT_SECS")]
    pub timeout: Option<u64>,
}

/// Arguments for the list command
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Maximum number of rows to print
    #[arg(short, long, default_value = "20")]
    pub limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_defaults() {
        let cli = Cli::try_parse_from(["x3-store", "seed"]).unwrap();

        match cli.command {
            Commands::Seed(args) => {
                assert_eq!(args.count, 1000);
                assert_eq!(args.table, PERSON_TABLE);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_verbose_after_subcommand() {
        let cli = Cli::try_parse_from(["x3-store", "migrate", "status", "--verbose"]).unwrap();

        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Migrate(MigrateArgs {
                action: MigrateAction::Status
            })
        ));
    }

    #[test]
    fn test_list_limit() {
        let cli = Cli::try_parse_from(["x3-store", "list", "-l", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::List(ListArgs { limit: 5 })));
    }

    #[test]
    fn test_unknown_migrate_action_rejected() {
        assert!(Cli::try_parse_from(["x3-store", "migrate", "sideways"]).is_err());
    }
}
