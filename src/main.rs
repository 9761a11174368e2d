use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, error, info};

use opname_api::{
    config::{self, AppConfig},
    db,
    directory::memory::InMemoryDirectory,
    models::{AssetDiff, Location, ProcessingStatus},
    AppServices, Collaborators, OpnameApp,
};

#[derive(Parser)]
#[command(name = "opname", about = "Asset stock-take (opname) sessions", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        default_value = "demos/directory.json",
        help = "JSON seed for sites, users, assets and report rows"
    )]
    directory: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Open a session at a site or department
    Start(StartArgs),
    /// Record what a scan found for an asset
    Record(RecordArgs),
    /// Remove an asset's record from a session
    Remove(AssetArgs),
    /// List recorded assets of a session
    Progress(SessionArgs),
    /// List expected assets not scanned yet
    Unscanned(SessionArgs),
    /// Show a session
    Show(SessionArgs),
    /// List finished sessions at a location
    History(LocationArgs),
    /// Submit a session for review
    Finish(ActorArgs),
    /// Approve a submitted or escalated session
    Approve(ActorArgs),
    /// Reject a submitted or escalated session
    Reject(ActorArgs),
    /// Cancel a session and discard its records
    Cancel(ActorArgs),
    /// Write the BAP of a session
    Report(ReportArgs),
    /// Asset counts per category
    Stats(SessionArgs),
    #[command(subcommand)]
    Notes(NotesCommands),
}

#[derive(Args)]
struct LocationArgs {
    #[arg(long, conflicts_with = "dept", help = "Site id")]
    site: Option<i64>,
    #[arg(long, help = "Department id")]
    dept: Option<i64>,
}

impl LocationArgs {
    fn location(&self) -> Result<Location> {
        Ok(Location::from_ids(self.site, self.dept)?)
    }
}

#[derive(Args)]
struct StartArgs {
    #[arg(long, help = "Initiating user id")]
    user: i64,
    #[command(flatten)]
    location: LocationArgs,
}

#[derive(Args)]
struct SessionArgs {
    #[arg(long)]
    session: i64,
}

#[derive(Args)]
struct ActorArgs {
    #[arg(long)]
    session: i64,
    #[arg(long, help = "Acting user id")]
    user: i64,
}

#[derive(Args)]
struct AssetArgs {
    #[arg(long)]
    session: i64,
    #[arg(long)]
    tag: String,
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long, allow_hyphen_values = true)]
    session: i64,
    #[arg(long)]
    tag: String,
    #[arg(long, help = "Changed fields as a JSON object")]
    changes: String,
    #[arg(long, default_value = "")]
    reason: String,
    #[arg(long, default_value = "pending")]
    status: String,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long)]
    session: i64,
    #[arg(long, default_value = ".", help = "Directory the report is written to")]
    out: PathBuf,
}

#[derive(Subcommand)]
enum NotesCommands {
    /// Attach follow-up notes to a record
    Set {
        #[command(flatten)]
        asset: AssetArgs,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        text: String,
    },
    /// Remove follow-up notes from a record
    Clear {
        #[command(flatten)]
        asset: AssetArgs,
        #[arg(long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);

    let db_pool = db::connect_from_app_config(&config)
        .await
        .context("failed to connect to database")?;
    if config.auto_migrate || matches!(cli.command, Commands::Migrate) {
        db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    if matches!(cli.command, Commands::Migrate) {
        println!("Migrations applied");
        return Ok(());
    }

    let app = build_app(&cli, &config, Arc::new(db_pool)).await?;
    let OpnameApp {
        services,
        dispatcher,
        jobs,
    } = app;
    let notifications = tokio::spawn(dispatcher.run(jobs));

    let outcome = run_command(&services, cli.command, cli.json).await;

    // Closing the queue lets the dispatcher drain and stop.
    drop(services);
    match notifications.await {
        Ok(summary) => debug!(?summary, "Notifications drained"),
        Err(e) => error!(error = %e, "Notification dispatcher crashed"),
    }
    outcome
}

async fn build_app(cli: &Cli, config: &AppConfig, db: Arc<db::DbPool>) -> Result<OpnameApp> {
    let directory = InMemoryDirectory::from_file(&cli.directory, config.roles.role_map())
        .await
        .with_context(|| format!("failed to load directory {}", cli.directory.display()))?;
    info!(path = %cli.directory.display(), "Directory loaded");
    let collaborators = Collaborators::from_directory(Arc::new(directory), config)
        .context("failed to set up mail transport")?;
    Ok(OpnameApp::build(db, config, collaborators))
}

async fn run_command(services: &AppServices, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Migrate => Ok(()),
        Commands::Start(args) => {
            let location = args.location.location()?;
            let id = services
                .sessions
                .start_new_session(args.user, location)
                .await
                .context("failed to start session")?;
            if json {
                print_json(&serde_json::json!({ "session_id": id }))
            } else {
                println!("Session {} started at {}", id, location);
                Ok(())
            }
        }
        Commands::Record(args) => {
            let diff: AssetDiff =
                serde_json::from_str(&args.changes).context("--changes is not a valid diff")?;
            let status: ProcessingStatus = args.status.parse()?;
            let applied = services
                .asset_changes
                .process_asset_changes(args.session, &args.tag, diff, args.reason, status)
                .await
                .context("failed to record asset change")?;
            if json {
                print_json(&applied)
            } else if applied.is_empty() {
                println!("{}: nothing changed", args.tag);
                Ok(())
            } else {
                println!("{}: changed {}", args.tag, applied.field_names().join(", "));
                Ok(())
            }
        }
        Commands::Remove(args) => {
            services
                .asset_changes
                .remove_asset_change(args.session, &args.tag)
                .await
                .context("failed to remove asset change")?;
            println!("Removed {} from session {}", args.tag, args.session);
            Ok(())
        }
        Commands::Progress(args) => {
            let entries = services
                .asset_changes
                .load_opname_progress(args.session)
                .await?;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("No assets recorded yet");
            }
            for entry in entries {
                println!(
                    "- {} • {} • changed: {}{}",
                    entry.asset_tag,
                    entry.processing_status,
                    entry.changes.field_names().join(", "),
                    entry
                        .action_notes
                        .map(|n| format!(" • notes: {n}"))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Unscanned(args) => {
            let assets = services
                .asset_changes
                .get_unscanned_assets(args.session)
                .await?;
            if json {
                return print_json(&assets);
            }
            for asset in assets {
                println!("- {} • {}", asset.asset_tag, asset.name);
            }
            Ok(())
        }
        Commands::Show(args) => {
            let session = services.sessions.get_session(args.session).await?;
            if json {
                print_json(&session)
            } else {
                println!(
                    "Session {} • {} • {} • started by user {} at {}",
                    session.id, session.location, session.status, session.user_id, session.started_at
                );
                Ok(())
            }
        }
        Commands::History(args) => {
            let sessions = services
                .sessions
                .sessions_on_location(args.location()?)
                .await?;
            if json {
                return print_json(&sessions);
            }
            for s in sessions {
                println!(
                    "- Session {} • {} • {}",
                    s.id,
                    s.status,
                    s.completed_on
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }
        Commands::Finish(args) => {
            services
                .sessions
                .finish_opname_session(args.session, args.user)
                .await
                .context("failed to finish session")?;
            println!("Session {} submitted", args.session);
            Ok(())
        }
        Commands::Approve(args) => {
            let status = services
                .sessions
                .approve_opname_session(args.session, args.user)
                .await
                .context("failed to approve session")?;
            println!("Session {} is now {}", args.session, status);
            Ok(())
        }
        Commands::Reject(args) => {
            services
                .sessions
                .reject_opname_session(args.session, args.user)
                .await
                .context("failed to reject session")?;
            println!("Session {} rejected", args.session);
            Ok(())
        }
        Commands::Cancel(args) => {
            services
                .sessions
                .delete_session(args.session, args.user)
                .await
                .context("failed to cancel session")?;
            println!("Session {} cancelled", args.session);
            Ok(())
        }
        Commands::Report(args) => {
            let report = services.reports.generate_report(args.session).await?;
            let path = args.out.join(&report.filename);
            tokio::fs::write(&path, &report.bytes)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::Stats(args) => {
            let stats = services.reports.get_opname_stats(args.session).await?;
            if json {
                print_json(&stats)
            } else {
                println!(
                    "working {} • broken {} • misplaced {} • missing {}",
                    stats.working_assets,
                    stats.broken_assets,
                    stats.misplaced_assets,
                    stats.missing_assets
                );
                Ok(())
            }
        }
        Commands::Notes(NotesCommands::Set { asset, user, text }) => {
            services
                .asset_changes
                .set_action_notes(asset.session, &asset.tag, user, &text)
                .await?;
            println!("Notes saved for {}", asset.tag);
            Ok(())
        }
        Commands::Notes(NotesCommands::Clear { asset, user }) => {
            services
                .asset_changes
                .delete_action_notes(asset.session, &asset.tag, user)
                .await?;
            println!("Notes cleared for {}", asset.tag);
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
