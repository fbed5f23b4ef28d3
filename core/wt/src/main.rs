//! wt: work item board and session tracker.
//!
//! ## Subcommands
//!
//! - `item`: create, move, edit and inspect work items
//! - `session done`: close a session by hand
//! - `sessions`: list sessions (dead processes are reaped first)
//! - `probe`: print the store's change token
//! - `board`: live board that follows the store

mod board;
mod render;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use wt_core::{
    config, load_engine_config, query, watch, EngineConfig, NewWorkItem, Reaper, SessionState,
    Store, WorkItemEdit, WorkItemFilter, WorkItemStatus,
};

const BOARD_LOG_FILE: &str = "wt-board.log";

#[derive(Parser)]
#[command(name = "wt")]
#[command(about = "womtrees work item board")]
#[command(version)]
struct Cli {
    /// Engine config file (default: <config_dir>/womtrees/engine.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage work items
    Item {
        #[command(subcommand)]
        command: ItemCommand,
    },

    /// Manage sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// List sessions
    Sessions {
        /// Only sessions of this repository
        #[arg(long)]
        repo: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the store change token
    Probe,

    /// Live board
    Board {
        /// Only show this repository
        #[arg(long)]
        repo: Option<String>,

        /// Render once and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
enum ItemCommand {
    /// Create a work item in todo
    Create(CreateArgs),

    /// todo → working
    Start { id: i64 },

    /// working → input
    Input { id: i64 },

    /// working/input → review
    Review { id: i64 },

    /// review → done
    Done { id: i64 },

    /// Rename or re-branch a work item
    Edit {
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        branch: Option<String>,

        /// Record the worktree created for this item
        #[arg(long)]
        worktree: Option<String>,
    },

    /// Delete a work item and its sessions
    Delete { id: i64 },

    /// Show one work item
    Show {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// List work items
    List {
        #[arg(long)]
        repo: Option<String>,

        /// todo, working, input, review or done
        #[arg(long, value_parser = parse_status)]
        status: Option<WorkItemStatus>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    repo: String,

    #[arg(long)]
    branch: String,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    prompt: Option<String>,

    #[arg(long)]
    worktree: Option<String>,
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Mark a session done
    Done { id: i64 },
}

fn parse_status(raw: &str) -> Result<WorkItemStatus, String> {
    WorkItemStatus::parse(raw).ok_or_else(|| format!("unknown status '{}'", raw))
}

fn main() {
    let cli = Cli::parse();

    let _logging_guard = match cli.command {
        Commands::Board { once: false, .. } => wt_core::logging::init_file(BOARD_LOG_FILE),
        _ => {
            wt_core::logging::init_stderr();
            None
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("wt: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let engine = load_engine_config(cli.config).map_err(|e| e.to_string())?;
    let db_path = config::db_path().map_err(|e| e.to_string())?;
    let store = Store::with_retry(db_path, engine.retry);

    match cli.command {
        Commands::Item { command } => run_item(&store, command),
        Commands::Session {
            command: SessionCommand::Done { id },
        } => {
            let session = store
                .transition_session(id, SessionState::Done)
                .map_err(|e| e.to_string())?;
            println!("Session #{} ({}) is done", session.id, session.location);
            Ok(())
        }
        Commands::Sessions { repo, json } => {
            let snapshot = query::snapshot(&store, &Reaper::system(), repo.as_deref())
                .map_err(|e| e.to_string())?;
            if json {
                print_json(&snapshot.sessions)
            } else {
                print!("{}", render::sessions_table(&snapshot.sessions));
                Ok(())
            }
        }
        Commands::Probe => {
            let token = watch::probe(store.path());
            print!("{}", render::change_token(store.path(), &token));
            Ok(())
        }
        Commands::Board { repo, once } => run_board(store, engine, repo, once),
    }
}

fn run_item(store: &Store, command: ItemCommand) -> Result<(), String> {
    let moved = |id: i64, status: WorkItemStatus| -> Result<(), String> {
        let item = store
            .transition_work_item(id, status)
            .map_err(|e| e.to_string())?;
        println!("#{} {} → {}", item.id, item.display_name(), item.status);
        Ok(())
    };

    match command {
        ItemCommand::Create(args) => {
            let item = store
                .create_work_item(&NewWorkItem {
                    repo: args.repo,
                    branch: args.branch,
                    name: args.name,
                    prompt: args.prompt,
                    worktree_path: args.worktree,
                })
                .map_err(|e| e.to_string())?;
            println!("Created #{} {} ({})", item.id, item.display_name(), item.repo);
            Ok(())
        }
        ItemCommand::Start { id } => moved(id, WorkItemStatus::Working),
        ItemCommand::Input { id } => moved(id, WorkItemStatus::Input),
        ItemCommand::Review { id } => moved(id, WorkItemStatus::Review),
        ItemCommand::Done { id } => moved(id, WorkItemStatus::Done),
        ItemCommand::Edit {
            id,
            name,
            branch,
            worktree,
        } => {
            let edit = WorkItemEdit {
                name,
                branch,
                worktree_path: worktree,
            };
            let item = store
                .edit_work_item(id, &edit)
                .map_err(|e| e.to_string())?;
            println!("Updated #{} {} ({})", item.id, item.display_name(), item.branch);
            Ok(())
        }
        ItemCommand::Delete { id } => {
            let item = store.delete_work_item(id).map_err(|e| e.to_string())?;
            println!("Deleted #{} {}", item.id, item.display_name());
            Ok(())
        }
        ItemCommand::Show { id, json } => {
            let item = store.require_work_item(id).map_err(|e| e.to_string())?;
            let snapshot = query::snapshot(store, &Reaper::system(), Some(&item.repo))
                .map_err(|e| e.to_string())?;
            let sessions: Vec<_> = snapshot.sessions_for(id).cloned().collect();
            if json {
                print_json(&serde_json::json!({ "work_item": item, "sessions": sessions }))
            } else {
                print!("{}", render::item_detail(&item, &sessions));
                Ok(())
            }
        }
        ItemCommand::List { repo, status, json } => {
            let items = store
                .list_work_items(&WorkItemFilter { repo, status })
                .map_err(|e| e.to_string())?;
            if json {
                print_json(&items)
            } else {
                print!("{}", render::items_table(&items));
                Ok(())
            }
        }
    }
}

fn run_board(
    store: Store,
    engine: EngineConfig,
    repo: Option<String>,
    once: bool,
) -> Result<(), String> {
    if once {
        let mut dashboard = wt_core::Dashboard::new(store, Reaper::system(), repo.clone());
        dashboard.refresh();
        print!("{}", render::board(dashboard.board(), repo.as_deref()));
        return Ok(());
    }
    board::run(store, engine.watch, repo)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}
