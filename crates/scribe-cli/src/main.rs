mod config;
mod export_cmd;
mod milestone_cmds;
mod project_cmds;
mod report_cmd;
mod resolve;
mod status_cmd;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use sqlx::PgPool;

use scribe_core::project::ProjectManager;
use scribe_core::store::WorkflowStore;
use scribe_db::config::DbConfig;
use scribe_db::pool;

use config::ScribeConfig;

/// Timestamp format for human-readable output.
pub const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Parser)]
#[command(name = "scribe", about = "Resumable, staged content-generation workflows")]
struct Cli {
    /// Database URL (overrides SCRIBE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a scribe config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the scribe database and run migrations
    DbInit,
    /// Show the resolved configuration
    Config,
    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Record and inspect milestones
    Milestone {
        #[command(subcommand)]
        command: MilestoneCommands,
    },
    /// Show project progress (omit the project to list all)
    Status {
        /// Project ID or name
        project: Option<String>,
    },
    /// Show what a project needs next
    Resume {
        /// Project ID or name
        project: String,
    },
    /// Export a project as JSON or markdown
    Export {
        /// Project ID or name
        project: String,
        /// Output format: json or markdown
        #[arg(long, default_value = "markdown")]
        format: String,
        /// Output file path (defaults to stdout)
        #[arg(long)]
        output: Option<String>,
    },
    /// Show the cost report for a project
    Cost {
        /// Project ID or name
        project: String,
        /// Number of most expensive nodes to list
        #[arg(long, default_value_t = 5)]
        top: usize,
        /// Also print every recorded call with the running total
        #[arg(long)]
        timeline: bool,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Create a new project
    Create {
        /// Unique project name
        name: String,
        /// Initial metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },
    /// List projects (deleted ones only with --status deleted)
    List {
        /// Filter by status: active, archived or deleted
        #[arg(long)]
        status: Option<String>,
    },
    /// Show project details, milestones and sections
    Show {
        /// Project ID or name
        project: String,
    },
    /// Archive a project
    Archive {
        /// Project ID or name
        project: String,
    },
    /// Delete a project
    Delete {
        /// Project ID or name
        project: String,
        /// Remove the project and all its data instead of marking it deleted
        #[arg(long)]
        permanent: bool,
    },
    /// Merge a JSON object into the project's metadata
    Meta {
        /// Project ID or name
        project: String,
        /// JSON object to merge
        patch: String,
    },
}

#[derive(Subcommand)]
pub enum MilestoneCommands {
    /// Record a milestone
    Save {
        /// Project ID or name
        project: String,
        /// Milestone type, e.g. outline_generated
        kind: String,
        /// Milestone data as JSON
        #[arg(long)]
        data: Option<String>,
        /// Read milestone data from a JSON file
        #[arg(long)]
        file: Option<String>,
        /// Milestone metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Show a milestone (omit the type to list the latest of each)
    Show {
        /// Project ID or name
        project: String,
        /// Milestone type
        kind: Option<String>,
        /// List every milestone ever recorded
        #[arg(long)]
        history: bool,
    },
}

/// Execute the `scribe init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        refinement: config::RefinementSection::default(),
    };
    let path = config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!(
        "  refinement    = threshold {}, max {} iterations, {} concurrent units",
        cfg.refinement.quality_threshold,
        cfg.refinement.max_iterations,
        cfg.refinement.max_concurrency
    );
    println!();
    println!("Next: run `scribe db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `scribe db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &ScribeConfig) -> anyhow::Result<()> {
    println!("Initializing scribe database...");

    let db_pool = pool::connect_and_migrate(&resolved.db_config).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("scribe db-init complete.");
    Ok(())
}

fn cmd_config(resolved: &ScribeConfig) {
    let path = config::config_path();
    println!(
        "Config file: {}{}",
        path.display(),
        if path.exists() { "" } else { " (not found)" }
    );
    println!("database.url              = {}", resolved.db_config.database_url);
    println!(
        "refinement.quality_threshold = {}",
        resolved.refinement.quality_threshold
    );
    println!(
        "refinement.max_iterations    = {}",
        resolved.refinement.max_iterations
    );
    println!(
        "refinement.max_concurrency   = {}",
        resolved.pipeline.max_concurrency
    );
}

/// Connect to the configured database and wrap it in a project manager.
async fn open(resolved: &ScribeConfig) -> anyhow::Result<(PgPool, ProjectManager)> {
    let db_pool = pool::create_pool(&resolved.db_config)
        .await
        .with_context(|| {
            format!(
                "cannot reach {}; run `scribe db-init` first",
                resolved.db_config.database_url
            )
        })?;
    tracing::debug!(
        database = resolved.db_config.database_name().unwrap_or("?"),
        "database connected"
    );
    let projects = ProjectManager::new(WorkflowStore::new(db_pool.clone()));
    Ok((db_pool, projects))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "scribe", &mut std::io::stdout());
        }
        Commands::DbInit => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            cmd_db_init(&resolved).await?;
        }
        Commands::Config => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            cmd_config(&resolved);
        }
        Commands::Project { command } => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            let (db_pool, projects) = open(&resolved).await?;
            let result = project_cmds::run_project_command(command, &projects).await;
            db_pool.close().await;
            result?;
        }
        Commands::Milestone { command } => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            let (db_pool, projects) = open(&resolved).await?;
            let result = milestone_cmds::run_milestone_command(command, &projects).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { project } => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            let (db_pool, projects) = open(&resolved).await?;
            let result = status_cmd::run_status(&projects, project.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Resume { project } => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            let (db_pool, projects) = open(&resolved).await?;
            let result = status_cmd::run_resume(&projects, &project).await;
            db_pool.close().await;
            result?;
        }
        Commands::Export {
            project,
            format,
            output,
        } => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            let (db_pool, projects) = open(&resolved).await?;
            let result =
                export_cmd::run_export(&projects, &project, &format, output.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cost {
            project,
            top,
            timeline,
        } => {
            let resolved = ScribeConfig::resolve(cli.database_url.as_deref())?;
            let (db_pool, projects) = open(&resolved).await?;
            let result = report_cmd::run_cost_report(&projects, &project, top, timeline).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
