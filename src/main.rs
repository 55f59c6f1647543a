use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shark::commands::epic::Ctx;
use shark::commands::{self, task::VerbArgs};
use shark::config::{self, SharkConfig};
use shark::db;
use shark::error::Result;
use shark::model::RelationKind;
use shark::output::{self, Format};
use shark::sync::{DiscoveryMode, SyncStrategy, Validation};

#[derive(Parser)]
#[command(
    name = "shark",
    version,
    about = "Local-first hierarchical task manager for humans and coding agents"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Database path or URL (overrides environment and config)
    #[arg(long, global = true)]
    db: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold .sharkconfig.json and create the database
    Init,
    /// Manage epics
    Epic {
        #[command(subcommand)]
        action: EpicAction,
    },
    /// Manage features
    Feature {
        #[command(subcommand)]
        action: FeatureAction,
    },
    /// Manage tasks and their workflow state
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Backlog ideas not yet promoted to tasks
    Idea {
        #[command(subcommand)]
        action: IdeaAction,
    },
    /// Free-standing documents linked to entities
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },
    /// Reconcile docs/plan files with the database
    Sync {
        /// Conflict-resolution strategy
        #[arg(long, value_enum, default_value = "newer-wins")]
        strategy: SyncStrategy,
        /// Classify without applying changes
        #[arg(long)]
        dry_run: bool,
        /// Create database rows for files with no matching key
        #[arg(long)]
        create_missing: bool,
        /// Delete rows whose file has disappeared
        #[arg(long)]
        cleanup: bool,
        /// Ignore the incremental watermark and scan everything
        #[arg(long)]
        force_full_scan: bool,
        /// How strictly ill-formed files are treated
        #[arg(long, value_enum, default_value = "balanced")]
        validation: Validation,
        /// Discovery source: folder walk, index file, or both
        #[arg(long, value_enum, default_value = "folder")]
        discovery: DiscoveryMode,
        /// Abort with exit code 2 after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Inspect or validate the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Remote-replicated backend setup
    Cloud {
        #[command(subcommand)]
        action: CloudAction,
    },
}

#[derive(Subcommand)]
enum EpicAction {
    /// Create a new epic
    Create {
        title: String,
        #[arg(long, short)]
        description: Option<String>,
        /// 1-10 or low/medium/high
        #[arg(long)]
        priority: Option<String>,
        /// Relative folder overriding docs/plan for this subtree
        #[arg(long)]
        folder: Option<String>,
        /// Explicit file path, used verbatim
        #[arg(long)]
        filename: Option<String>,
    },
    /// Show one epic
    Get {
        key: String,
        /// Aggregate tasks and features instead of the bare row
        #[arg(long)]
        summary: bool,
    },
    /// List epics
    List {
        /// Include archived epics
        #[arg(long)]
        all: bool,
    },
    /// Edit epic fields
    Update {
        key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, short)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Delete an epic and all its descendants
    Delete { key: String },
    /// Complete every task under the epic
    Complete {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        /// Force-complete tasks the workflow would refuse
        #[arg(long)]
        force: bool,
    },
    /// Archive (or unarchive) an epic
    Archive {
        key: String,
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
enum FeatureAction {
    /// Create a new feature under an epic
    Create {
        title: String,
        #[arg(long)]
        epic: String,
        #[arg(long, short)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        filename: Option<String>,
    },
    /// Show one feature
    Get { key: String },
    /// List features
    List {
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Edit feature fields
    Update {
        key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, short)]
        description: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Delete a feature and its tasks
    Delete { key: String },
    /// Complete every task under the feature
    Complete {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Archive (or unarchive) a feature
    Archive {
        key: String,
        #[arg(long)]
        undo: bool,
    },
    /// Recompute the stored progress percentage
    Progress { key: String },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a new task under a feature
    Create {
        title: String,
        #[arg(long)]
        feature: String,
        #[arg(long, short)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        /// Free-form agent tag (backend, frontend, qa, ...)
        #[arg(long)]
        agent_type: Option<String>,
        #[arg(long)]
        order: Option<i64>,
        #[arg(long)]
        filename: Option<String>,
    },
    /// Show one task
    Get {
        key: String,
        /// Include the status history
        #[arg(long)]
        history: bool,
    },
    /// List and filter tasks
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        agent_type: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        order_min: Option<i64>,
        #[arg(long)]
        order_max: Option<i64>,
        /// RFC 3339 lower bound on completion time
        #[arg(long)]
        completed_after: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound on completion time
        #[arg(long)]
        completed_before: Option<DateTime<Utc>>,
        #[arg(long)]
        all: bool,
    },
    /// Edit task fields
    Update {
        key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, short)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        agent_type: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        order: Option<i64>,
        /// JSON scratch payload
        #[arg(long)]
        context: Option<String>,
        /// JSON list of touched files
        #[arg(long)]
        files_changed: Option<String>,
    },
    /// Delete a task
    Delete { key: String },
    /// Archive (or unarchive) a task
    Archive {
        key: String,
        #[arg(long)]
        undo: bool,
    },
    /// Begin work (assigns the agent and opens a work session)
    Start {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Advance toward review
    Complete {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Accept reviewed work as done
    Approve {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Send a task back to the start of the pipeline
    Reopen {
        key: String,
        /// Rejection reason (bumps the rejection counter)
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Mark a task blocked
    Block {
        key: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Clear a blocked task back to the start set
    Unblock {
        key: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Set an explicit status (custom workflows)
    Status {
        key: String,
        status: String,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Free-form dated notes
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },
    /// Acceptance criteria
    Criterion {
        #[command(subcommand)]
        action: CriterionAction,
    },
    /// Add a relationship edge
    Link {
        from: String,
        to: String,
        #[arg(long, value_enum, default_value = "depends_on")]
        kind: RelationKind,
    },
    /// Remove a relationship edge
    Unlink {
        from: String,
        to: String,
        #[arg(long, value_enum, default_value = "depends_on")]
        kind: RelationKind,
    },
    /// Show relationships and unmet dependencies
    Links { key: String },
    /// List work sessions
    Sessions { key: String },
}

#[derive(Subcommand)]
enum NoteAction {
    Add {
        key: String,
        body: String,
        #[arg(long)]
        author: Option<String>,
    },
    List { key: String },
}

#[derive(Subcommand)]
enum CriterionAction {
    Add { key: String, description: String },
    List { key: String },
    /// Mark a criterion met (or unmet with --undo)
    Check {
        id: i64,
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
enum IdeaAction {
    Add {
        title: String,
        #[arg(long, short)]
        description: Option<String>,
    },
    List,
    /// Create a task from an idea and drop it from the backlog
    Promote {
        id: i64,
        #[arg(long)]
        feature: String,
        #[arg(long)]
        agent: Option<String>,
    },
}

#[derive(Subcommand)]
enum DocAction {
    Add {
        title: String,
        file_path: String,
        #[arg(long)]
        doc_type: Option<String>,
        /// Entity key to link the document to
        #[arg(long)]
        link: Option<String>,
    },
    Link { key: String, document_id: i64 },
    List { key: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the merged configuration
    Show,
    /// Check the workflow graph and file patterns
    Validate,
}

#[derive(Subcommand)]
enum CloudAction {
    /// Record the remote database URL and token file location
    Init {
        url: String,
        #[arg(long)]
        token_file: Option<String>,
    },
    /// Write the auth token file (owner-only permissions)
    Login {
        #[arg(long)]
        token: Option<String>,
    },
}

fn run(cli: Cli, format: Format) -> Result<()> {
    let root = config::project_root()?;
    let mut cfg = SharkConfig::load(&root)?;
    output::set_color(cfg.color_enabled());
    let db_flag = cli.db.as_deref();
    let ctx = Ctx {
        root: &root,
        config: &cfg,
        db_flag,
        format,
    };

    match cli.command {
        Commands::Init => commands::init::run(&root, format),
        Commands::Epic { action } => match action {
            EpicAction::Create {
                title,
                description,
                priority,
                folder,
                filename,
            } => commands::epic::create(
                &ctx,
                &title,
                description.as_deref(),
                priority.as_deref(),
                folder.as_deref(),
                filename.as_deref(),
            ),
            EpicAction::Get { key, summary } => commands::epic::get(&ctx, &key, summary),
            EpicAction::List { all } => commands::epic::list(&ctx, all),
            EpicAction::Update {
                key,
                title,
                description,
                status,
                priority,
                folder,
            } => commands::epic::update(
                &ctx,
                &key,
                title.as_deref(),
                description.as_deref(),
                status.as_deref(),
                priority.as_deref(),
                folder.as_deref(),
            ),
            EpicAction::Delete { key } => commands::epic::delete(&ctx, &key),
            EpicAction::Complete { key, agent, force } => {
                commands::epic::complete(&ctx, &key, agent.as_deref(), force)
            }
            EpicAction::Archive { key, undo } => commands::epic::archive(&ctx, &key, undo),
        },
        Commands::Feature { action } => match action {
            FeatureAction::Create {
                title,
                epic,
                description,
                priority,
                order,
                folder,
                filename,
            } => commands::feature::create(
                &ctx,
                &epic,
                &title,
                description.as_deref(),
                priority.as_deref(),
                order,
                folder.as_deref(),
                filename.as_deref(),
            ),
            FeatureAction::Get { key } => commands::feature::get(&ctx, &key),
            FeatureAction::List { epic, all } => {
                commands::feature::list(&ctx, epic.as_deref(), all)
            }
            FeatureAction::Update {
                key,
                title,
                description,
                status,
                priority,
                order,
                folder,
            } => commands::feature::update(
                &ctx,
                &key,
                title.as_deref(),
                description.as_deref(),
                status.as_deref(),
                priority.as_deref(),
                order,
                folder.as_deref(),
            ),
            FeatureAction::Delete { key } => commands::feature::delete(&ctx, &key),
            FeatureAction::Complete { key, agent, force } => {
                commands::feature::complete(&ctx, &key, agent.as_deref(), force)
            }
            FeatureAction::Archive { key, undo } => commands::feature::archive(&ctx, &key, undo),
            FeatureAction::Progress { key } => commands::feature::refresh_progress(&ctx, &key),
        },
        Commands::Task { action } => match action {
            TaskAction::Create {
                title,
                feature,
                description,
                priority,
                agent_type,
                order,
                filename,
            } => commands::task::create(
                &ctx,
                &feature,
                &title,
                description.as_deref(),
                priority.as_deref(),
                agent_type.as_deref(),
                order,
                filename.as_deref(),
            ),
            TaskAction::Get { key, history } => commands::task::get(&ctx, &key, history),
            TaskAction::List {
                status,
                epic,
                feature,
                agent_type,
                agent,
                order_min,
                order_max,
                completed_after,
                completed_before,
                all,
            } => commands::task::list(
                &ctx,
                status.as_deref(),
                epic.as_deref(),
                feature.as_deref(),
                agent_type.as_deref(),
                agent.as_deref(),
                order_min,
                order_max,
                completed_after,
                completed_before,
                all,
            ),
            TaskAction::Update {
                key,
                title,
                description,
                priority,
                agent_type,
                agent,
                order,
                context,
                files_changed,
            } => commands::task::update(
                &ctx,
                &key,
                title.as_deref(),
                description.as_deref(),
                priority.as_deref(),
                agent_type.as_deref(),
                agent.as_deref(),
                order,
                context.as_deref(),
                files_changed.as_deref(),
            ),
            TaskAction::Delete { key } => commands::task::delete(&ctx, &key),
            TaskAction::Archive { key, undo } => commands::task::archive(&ctx, &key, undo),
            TaskAction::Start { key, agent, force } => commands::task::verb(
                &ctx,
                "start",
                &key,
                VerbArgs {
                    agent: agent.as_deref(),
                    force,
                    ..Default::default()
                },
            ),
            TaskAction::Complete {
                key,
                agent,
                notes,
                force,
            } => commands::task::verb(
                &ctx,
                "complete",
                &key,
                VerbArgs {
                    agent: agent.as_deref(),
                    notes: notes.as_deref(),
                    force,
                    ..Default::default()
                },
            ),
            TaskAction::Approve {
                key,
                agent,
                notes,
                force,
            } => commands::task::verb(
                &ctx,
                "approve",
                &key,
                VerbArgs {
                    agent: agent.as_deref(),
                    notes: notes.as_deref(),
                    force,
                    ..Default::default()
                },
            ),
            TaskAction::Reopen {
                key,
                reason,
                agent,
                force,
            } => commands::task::verb(
                &ctx,
                "reopen",
                &key,
                VerbArgs {
                    agent: agent.as_deref(),
                    reason: reason.as_deref(),
                    force,
                    ..Default::default()
                },
            ),
            TaskAction::Block {
                key,
                reason,
                agent,
                force,
            } => commands::task::verb(
                &ctx,
                "block",
                &key,
                VerbArgs {
                    agent: agent.as_deref(),
                    reason: Some(&reason),
                    force,
                    ..Default::default()
                },
            ),
            TaskAction::Unblock { key, agent, force } => commands::task::verb(
                &ctx,
                "unblock",
                &key,
                VerbArgs {
                    agent: agent.as_deref(),
                    force,
                    ..Default::default()
                },
            ),
            TaskAction::Status {
                key,
                status,
                agent,
                notes,
                force,
            } => commands::task::set_status(
                &ctx,
                &key,
                &status,
                VerbArgs {
                    agent: agent.as_deref(),
                    notes: notes.as_deref(),
                    force,
                    ..Default::default()
                },
            ),
            TaskAction::Note { action } => match action {
                NoteAction::Add { key, body, author } => {
                    commands::task::note_add(&ctx, &key, &body, author.as_deref())
                }
                NoteAction::List { key } => commands::task::note_list(&ctx, &key),
            },
            TaskAction::Criterion { action } => match action {
                CriterionAction::Add { key, description } => {
                    commands::task::criterion_add(&ctx, &key, &description)
                }
                CriterionAction::List { key } => commands::task::criterion_list(&ctx, &key),
                CriterionAction::Check { id, undo } => {
                    commands::task::criterion_check(&ctx, id, undo)
                }
            },
            TaskAction::Link { from, to, kind } => commands::task::link(&ctx, &from, &to, kind),
            TaskAction::Unlink { from, to, kind } => {
                commands::task::unlink(&ctx, &from, &to, kind)
            }
            TaskAction::Links { key } => commands::task::links(&ctx, &key),
            TaskAction::Sessions { key } => commands::task::sessions(&ctx, &key),
        },
        Commands::Idea { action } => match action {
            IdeaAction::Add { title, description } => {
                commands::idea::add(&ctx, &title, description.as_deref())
            }
            IdeaAction::List => commands::idea::list(&ctx),
            IdeaAction::Promote { id, feature, agent } => {
                commands::idea::promote(&ctx, id, &feature, agent.as_deref())
            }
        },
        Commands::Doc { action } => match action {
            DocAction::Add {
                title,
                file_path,
                doc_type,
                link,
            } => commands::doc::add(
                &ctx,
                &title,
                &file_path,
                doc_type.as_deref(),
                link.as_deref(),
            ),
            DocAction::Link { key, document_id } => commands::doc::link(&ctx, &key, document_id),
            DocAction::List { key } => commands::doc::list(&ctx, &key),
        },
        Commands::Sync {
            strategy,
            dry_run,
            create_missing,
            cleanup,
            force_full_scan,
            validation,
            discovery,
            timeout_secs,
        } => commands::sync_cmd::run(
            &root,
            &mut cfg,
            db_flag,
            format,
            strategy,
            dry_run,
            create_missing,
            cleanup,
            force_full_scan,
            validation,
            discovery,
            timeout_secs,
        ),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&cfg, format),
            ConfigAction::Validate => commands::config_cmd::validate(&root, &cfg, format),
        },
        Commands::Cloud { action } => match action {
            CloudAction::Init { url, token_file } => {
                commands::cloud::init(&root, &mut cfg, &url, token_file.as_deref(), format)
            }
            CloudAction::Login { token } => {
                commands::cloud::login(&root, &cfg, token.as_deref(), format)
            }
        },
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SHARK_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    let outcome = run(cli, format);
    // Close the shared handle regardless of command success.
    db::close_handle();
    if let Err(e) = outcome {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(e.exit_code());
    }
}
