use clap::{Parser, Subcommand};
use roster_core::Region;
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "roster-sync")]
#[command(
    author,
    version,
    about = "Syncs school rosters from Wonde into a flat record store"
)]
#[command(after_help = "Examples:
  roster-sync schools
  roster-sync roster A5960542 > roster.json
  roster-sync sync A5960542 --dry-run --lookups lookups.json
  roster-sync apply request.json
  roster-sync seed-lookups lookups.json")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Wonde API bearer token
    #[arg(long, env = "WONDE_API_TOKEN", global = true, hide_env_values = true)]
    pub api_token: Option<String>,

    /// Upstream region (au or uk)
    #[arg(long, env = "WONDE_REGION", global = true)]
    pub region: Option<Region>,

    /// Custom path to the config.toml file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the schools visible to the API token
    Schools,
    /// Fetch and print the filtered roster of a school
    Roster {
        /// Upstream school id
        school_id: String,
    },
    /// Fetch a school's roster and run it through the sync pipeline
    #[command(after_help = "Examples:
  roster-sync sync A5960542
  roster-sync sync A5960542 --skip-existing-people
  roster-sync sync A5960542 --dry-run --lookups lookups.json")]
    Sync {
        /// Upstream school id
        school_id: String,
        /// Write to an in-memory store instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,
        /// Reuse stored students and teachers instead of inserting them again
        #[arg(long)]
        skip_existing_people: bool,
        /// Lookup tables to seed the in-memory store with (dry runs only)
        #[arg(long, value_name = "FILE", requires = "dry_run")]
        lookups: Option<PathBuf>,
    },
    /// Run a saved save-school request body through the sync pipeline
    Apply {
        /// JSON file holding the request body
        request: PathBuf,
        /// Write to an in-memory store instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,
    },
    /// Load Country, State, LearningArea and YearLevel rows from a JSON file
    SeedLookups {
        /// JSON file with countries, states, learningAreas and yearLevels
        file: PathBuf,
    },
    /// Show record counts per table
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_flags() {
        let config = Config::try_parse_from([
            "roster-sync",
            "--region",
            "uk",
            "sync",
            "A5960542",
            "--dry-run",
            "--skip-existing-people",
        ])
        .unwrap();

        assert_eq!(config.region, Some(Region::Uk));
        match config.command {
            Command::Sync {
                school_id,
                dry_run,
                skip_existing_people,
                lookups,
            } => {
                assert_eq!(school_id, "A5960542");
                assert!(dry_run);
                assert!(skip_existing_people);
                assert!(lookups.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_lookups_requires_dry_run() {
        let result = Config::try_parse_from([
            "roster-sync",
            "sync",
            "A5960542",
            "--lookups",
            "lookups.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_region_rejected() {
        let result = Config::try_parse_from(["roster-sync", "--region", "mars", "schools"]);
        assert!(result.is_err());
    }
}
