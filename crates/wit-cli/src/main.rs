//! WIT CLI
//!
//! Command-line interface for WIT - work item tracking.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use wit_core::{CancelToken, Config, Database, TableJoinRegistry, WorkItemRepository};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "wit")]
#[command(about = "WIT - Work item tracking")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (overrides WIT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and its schema
    Init,
    /// Show configuration
    Config,
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Manage space templates and their work item types
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
    /// Manage spaces
    Space {
        #[command(subcommand)]
        command: SpaceCommands,
    },
    /// Manage iterations
    Iteration {
        #[command(subcommand)]
        command: IterationCommands,
    },
    /// Manage work items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    #[command(alias = "add")]
    Create {
        username: String,
        /// Full name shown next to the username
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// Import a space template and its types from a TOML file
    Import { file: PathBuf },
    /// List the work item types of a template
    #[command(alias = "ls")]
    Types { template: Uuid },
}

#[derive(Subcommand)]
enum SpaceCommands {
    /// Create a space
    #[command(alias = "add")]
    Create {
        name: String,
        /// Space template the space uses
        #[arg(long)]
        template: Uuid,
        /// Owning user
        #[arg(long)]
        owner: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum IterationCommands {
    /// Create an iteration
    #[command(alias = "add")]
    Create {
        space: Uuid,
        name: String,
        /// Parent iteration
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// List iterations with open and closed item counts
    #[command(alias = "ls")]
    List { space: Uuid },
    /// Show item counts for one iteration and its descendants
    Counts { iteration: Uuid },
}

/// Field assignments as `name=value`; values are read as JSON, else as text
#[derive(Args)]
struct FieldArgs {
    #[arg(short, long = "field", value_name = "NAME=VALUE")]
    fields: Vec<String>,
}

/// Item filter options
#[derive(Args)]
struct FilterArgs {
    /// Require a field to equal a value, `name=value` (repeatable)
    #[arg(short = 'w', long = "where", value_name = "NAME=VALUE")]
    conditions: Vec<String>,
    /// Filter expression as JSON
    #[arg(long)]
    filter: Option<String>,
}

#[derive(Subcommand)]
enum ItemCommands {
    /// Create a work item
    #[command(alias = "add")]
    Create {
        space: Uuid,
        /// Work item type
        #[arg(short = 't', long = "type")]
        type_id: Uuid,
        /// Acting user
        #[arg(long = "as")]
        user: Uuid,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// Show a work item
    Show { space: Uuid, number: i64 },
    /// Update fields or the type of a work item
    #[command(alias = "edit")]
    Set {
        space: Uuid,
        number: i64,
        #[arg(long = "as")]
        user: Uuid,
        /// Change the work item type
        #[arg(short = 't', long = "type")]
        type_id: Option<Uuid>,
        #[command(flatten)]
        fields: FieldArgs,
    },
    /// List work items
    #[command(alias = "ls")]
    List {
        space: Uuid,
        #[command(flatten)]
        filter: FilterArgs,
        /// Only items without a parent
        #[arg(long)]
        top_level: bool,
        #[arg(long)]
        start: Option<usize>,
        #[arg(long)]
        length: Option<usize>,
        /// execution, -execution, created, -created, updated, -updated
        #[arg(long, default_value = "-execution")]
        sort: String,
    },
    /// Count work items
    Count {
        space: Uuid,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Move a work item in the execution order
    #[command(alias = "mv")]
    Move {
        space: Uuid,
        number: i64,
        #[arg(long = "as")]
        user: Uuid,
        #[command(flatten)]
        position: PositionArgs,
    },
    /// Delete a work item
    #[command(alias = "rm")]
    Delete {
        space: Uuid,
        number: i64,
        #[arg(long = "as")]
        user: Uuid,
        /// Only delete if the item is still at this version
        #[arg(long)]
        version: Option<i64>,
    },
    /// Show the revision history of a work item
    History { space: Uuid, number: i64 },
    /// Make one work item the parent of another
    Link {
        space: Uuid,
        parent: i64,
        child: i64,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PositionArgs {
    /// Place before the item with this number
    #[arg(long)]
    above: Option<i64>,
    /// Place after the item with this number
    #[arg(long)]
    below: Option<i64>,
    #[arg(long)]
    top: bool,
    #[arg(long)]
    bottom: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    init_logging(&config);

    if let Commands::Config = cli.command {
        return commands::config::show(&config, cli.config.as_ref(), &output);
    }

    let mut db = Database::open(&config).context("Failed to open database")?;
    let repo = WorkItemRepository::with_config(TableJoinRegistry::default(), &config);
    let ctx = CancelToken::new();
    ctx.attach(db.connection());
    debug!(path = %config.database_path().display(), "database opened");

    let mut session = commands::Session {
        db: &mut db,
        repo: &repo,
        ctx: &ctx,
        output: &output,
    };

    match cli.command {
        Commands::Init => commands::setup::init(&config, &output),
        Commands::Config => Ok(()),
        Commands::User { command } => match command {
            UserCommands::Create {
                username,
                full_name,
                email,
            } => commands::setup::create_user(&mut session, username, full_name, email),
        },
        Commands::Template { command } => match command {
            TemplateCommands::Import { file } => commands::setup::import_template(&mut session, &file),
            TemplateCommands::Types { template } => commands::setup::list_types(&mut session, template),
        },
        Commands::Space { command } => match command {
            SpaceCommands::Create {
                name,
                template,
                owner,
            } => commands::setup::create_space(&mut session, name, template, owner),
        },
        Commands::Iteration { command } => match command {
            IterationCommands::Create {
                space,
                name,
                parent,
            } => commands::iteration::create(&mut session, space, name, parent),
            IterationCommands::List { space } => commands::iteration::list(&mut session, space),
            IterationCommands::Counts { iteration } => {
                commands::iteration::counts(&mut session, iteration)
            }
        },
        Commands::Item { command } => handle_item_command(command, &mut session),
    }
}

fn handle_item_command(command: ItemCommands, session: &mut commands::Session<'_>) -> Result<()> {
    use commands::item;

    match command {
        ItemCommands::Create {
            space,
            type_id,
            user,
            fields,
        } => item::create(session, space, type_id, user, &fields.fields),
        ItemCommands::Show { space, number } => item::show(session, space, number),
        ItemCommands::Set {
            space,
            number,
            user,
            type_id,
            fields,
        } => item::set(session, space, number, user, type_id, &fields.fields),
        ItemCommands::List {
            space,
            filter,
            top_level,
            start,
            length,
            sort,
        } => {
            let criteria = item::parse_filter(&filter.conditions, filter.filter.as_deref())?;
            let options = wit_core::ListOptions {
                parent_exists: top_level.then_some(false),
                start,
                length,
                sort: sort.parse()?,
            };
            item::list(session, space, criteria.as_ref(), &options)
        }
        ItemCommands::Count { space, filter } => {
            let criteria = item::parse_filter(&filter.conditions, filter.filter.as_deref())?;
            item::count(session, space, criteria.as_ref())
        }
        ItemCommands::Move {
            space,
            number,
            user,
            position,
        } => {
            let direction = match (position.above, position.below, position.top) {
                (Some(target), _, _) => item::Position::Above(target),
                (_, Some(target), _) => item::Position::Below(target),
                (_, _, true) => item::Position::Top,
                _ => item::Position::Bottom,
            };
            item::reorder(session, space, number, user, direction)
        }
        ItemCommands::Delete {
            space,
            number,
            user,
            version,
        } => item::delete(session, space, number, user, version),
        ItemCommands::History { space, number } => item::history(session, space, number),
        ItemCommands::Link {
            space,
            parent,
            child,
        } => item::link(session, space, parent, child),
    }
}

/// Initialize logging to stderr
///
/// `RUST_LOG` takes precedence over the configured log level.
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "wit_core={},wit_cli={}",
            config.log_level, config.log_level
        ))
    });

    // ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
