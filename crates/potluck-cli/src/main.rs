mod app;
mod catalog;
mod config;
mod plan_cmds;
mod task_cmds;
mod vote_cmds;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use potluck_db::config::DbConfig;
use potluck_db::pool;

use app::App;
use config::PotluckConfig;

#[derive(Parser)]
#[command(name = "potluck", about = "Household meal-plan voting and finalization")]
struct Cli {
    /// Database URL (overrides POTLUCK_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Catalog TOML with households, meals, recipes and conversions
    /// (overrides POTLUCK_CATALOG env var)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Acting user, recorded on change messages
    #[arg(long = "as", global = true, value_name = "USER")]
    acting_user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a potluck config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Catalog file to record in the config
        #[arg(long)]
        catalog_path: Option<PathBuf>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the potluck database
    DbInit,
    /// Meal plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Cast a ballot on an event
    Vote {
        /// Event ID
        event_id: String,
        /// Voting member
        #[arg(long)]
        voter: String,
        /// Option IDs in order of preference, best first
        #[arg(long = "rank", value_name = "OPTION_ID")]
        ranks: Vec<String>,
        /// Abstain instead of ranking
        #[arg(long, conflicts_with = "ranks")]
        abstain: bool,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Decide an event for an option (plan owner only, via --as)
    Decide {
        /// Event ID
        event_id: String,
        /// Winning option ID
        option_id: String,
    },
    /// Finalize a plan whose events are all decided and derive its tasks
    /// and grocery list
    Finalize {
        /// Plan ID
        plan_id: String,
    },
    /// Decide events whose voting deadline has passed
    Sweep {
        /// Run one pass and exit
        #[arg(long)]
        once: bool,
    },
    /// List a plan's prep tasks
    Tasks {
        /// Plan ID
        plan_id: String,
    },
    /// Change a prep task's status
    TaskStatus {
        /// Task ID
        task_id: String,
        /// unfinished, in_progress, ignored, canceled or finished
        status: String,
        #[arg(long, default_value = "")]
        explanation: String,
    },
    /// Show a plan's grocery list
    Grocery {
        /// Plan ID
        plan_id: String,
    },
    /// Change a grocery list item's status
    GroceryStatus {
        /// Grocery list item ID
        item_id: String,
        /// unknown, already_have, needs, unavailable or acquired
        status: String,
        /// UPC of the purchased product
        #[arg(long)]
        upc: Option<String>,
        #[arg(long, default_value = "")]
        explanation: String,
    },
    /// Print shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Create a plan from a plan-definition TOML file and open voting
    Create {
        /// Path to the plan TOML file
        file: PathBuf,
    },
    /// Show plan details with events, options and ballots
    Show {
        /// Plan ID
        plan_id: String,
    },
    /// List a household's plans
    List {
        #[arg(long)]
        household: String,
    },
    /// Change notes or the voting deadline while voting is open
    Update {
        /// Plan ID
        plan_id: String,
        #[arg(long)]
        notes: Option<String>,
        /// New deadline (RFC 3339)
        #[arg(long)]
        deadline: Option<String>,
    },
    /// List household members who still owe a ballot, per undecided event
    MissingVotes {
        /// Plan ID
        plan_id: String,
    },
    /// Add an option to an event that has no ballots yet
    AddOption {
        /// Event ID
        event_id: String,
        /// Meal ID
        meal_id: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Archive a plan, or one event or option of it
    Archive {
        /// Plan, event or option ID
        id: String,
        /// Treat the ID as an event
        #[arg(long, conflicts_with = "option")]
        event: bool,
        /// Treat the ID as an option
        #[arg(long)]
        option: bool,
    },
}

/// Execute the `potluck init` command: write config file.
fn cmd_init(db_url: &str, catalog_path: Option<&Path>, force: bool) -> Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_owned(),
        },
        catalog: catalog_path.map(|p| config::CatalogSection {
            path: p.to_path_buf(),
        }),
        voting: config::VotingSection::default(),
    };
    config::save_config_to(&cfg, &path)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    if let Some(p) = catalog_path {
        println!("  catalog.path = {}", p.display());
    }
    println!();
    println!("Next: run `potluck db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `potluck db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &PotluckConfig) -> Result<()> {
    println!("Initializing potluck database...");

    match pool::ensure_database_exists(&resolved.db_config).await? {
        pool::DatabaseStatus::Created => println!("Created database."),
        pool::DatabaseStatus::Existing => println!("Database already exists."),
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in counts.rows() {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("potluck db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            catalog_path,
            force,
        } => return cmd_init(&db_url, catalog_path.as_deref(), force),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "potluck", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let resolved = PotluckConfig::resolve(cli.database_url.as_deref(), cli.catalog.as_deref())?;
    if let Commands::DbInit = cli.command {
        return cmd_db_init(&resolved).await;
    }

    let app = App::connect(resolved).await?;
    let user = cli.acting_user.as_deref();
    let result = match cli.command {
        Commands::Plan { command } => plan_cmds::run_plan_command(command, &app, user).await,
        Commands::Vote {
            event_id,
            voter,
            ranks,
            abstain,
            notes,
        } => {
            let ballot = vote_cmds::BallotArgs {
                ranks,
                abstain,
                notes,
            };
            vote_cmds::cmd_vote(&app, user, &event_id, &voter, ballot).await
        }
        Commands::Decide {
            event_id,
            option_id,
        } => vote_cmds::cmd_decide(&app, user, &event_id, &option_id).await,
        Commands::Finalize { plan_id } => vote_cmds::cmd_finalize(&app, user, &plan_id).await,
        Commands::Sweep { once } => vote_cmds::cmd_sweep(&app, once).await,
        Commands::Tasks { plan_id } => task_cmds::cmd_tasks(&app, user, &plan_id).await,
        Commands::TaskStatus {
            task_id,
            status,
            explanation,
        } => task_cmds::cmd_task_status(&app, user, &task_id, &status, &explanation).await,
        Commands::Grocery { plan_id } => task_cmds::cmd_grocery(&app, user, &plan_id).await,
        Commands::GroceryStatus {
            item_id,
            status,
            upc,
            explanation,
        } => {
            task_cmds::cmd_grocery_status(&app, user, &item_id, &status, upc, explanation).await
        }
        Commands::Init { .. } | Commands::Completions { .. } | Commands::DbInit => Ok(()),
    };
    app.shutdown().await;
    result
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn vote_collects_ranks_in_order() {
        let cli = Cli::try_parse_from([
            "potluck", "vote", "ev-1", "--voter", "ana", "--rank", "opt-b", "--rank", "opt-a",
        ])
        .unwrap();
        match cli.command {
            Commands::Vote {
                event_id, ranks, ..
            } => {
                assert_eq!(event_id, "ev-1");
                assert_eq!(ranks, ["opt-b", "opt-a"]);
            }
            _ => panic!("expected vote"),
        }
    }

    #[test]
    fn abstain_conflicts_with_ranks() {
        let result = Cli::try_parse_from([
            "potluck", "vote", "ev-1", "--voter", "ana", "--rank", "opt-a", "--abstain",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn missing_votes_takes_plan_id() {
        let cli = Cli::try_parse_from(["potluck", "plan", "missing-votes", "plan-1"]).unwrap();
        match cli.command {
            Commands::Plan {
                command: PlanCommands::MissingVotes { plan_id },
            } => assert_eq!(plan_id, "plan-1"),
            _ => panic!("expected plan missing-votes"),
        }
    }

    #[test]
    fn acting_user_is_global() {
        let cli =
            Cli::try_parse_from(["potluck", "decide", "ev-1", "opt-a", "--as", "ana"]).unwrap();
        assert_eq!(cli.acting_user.as_deref(), Some("ana"));
    }
}
