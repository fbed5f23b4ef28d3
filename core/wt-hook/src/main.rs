//! wt-hook: records assistant session signals for womtrees.
//!
//! Called by the assistant's hooks inside a multiplexer pane. Every
//! invocation is its own short-lived process and writes straight into the
//! shared store.
//!
//! ## Subcommands
//!
//! - `heartbeat`: the assistant is working
//! - `stop`: the assistant finished a turn and waits for the user
//! - `mark-done`: the session is over
//! - `input`: the assistant needs the user's input
//!
//! ## Contract
//!
//! The hook must never get in the assistant's way: nothing is written to
//! stdout or stderr (apart from `--help`/`--version`) and the exit code is
//! always 0. Diagnostics go to `<data_dir>/logs/wt-hook.log`.

mod handle;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use wt_core::SignalKind;

const LOG_FILE: &str = "wt-hook.log";

#[derive(Parser)]
#[command(name = "wt-hook")]
#[command(about = "womtrees session signal recorder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// The assistant is working
    Heartbeat(HookArgs),

    /// The assistant stopped and waits for the user
    Stop(HookArgs),

    /// The session is finished
    MarkDone(HookArgs),

    /// The assistant needs input from the user
    Input(HookArgs),
}

impl Commands {
    fn split(self) -> (SignalKind, HookArgs) {
        match self {
            Commands::Heartbeat(args) => (SignalKind::Heartbeat, args),
            Commands::Stop(args) => (SignalKind::Stop, args),
            Commands::MarkDone(args) => (SignalKind::MarkDone, args),
            Commands::Input(args) => (SignalKind::InputNeeded, args),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct HookArgs {
    /// Multiplexer session name (default: $WT_MUX_SESSION)
    #[arg(long)]
    pub mux_session: Option<String>,

    /// Multiplexer pane id (default: $TMUX_PANE)
    #[arg(long)]
    pub pane: Option<String>,

    /// Assistant process id (default: parent process)
    #[arg(long)]
    pub pid: Option<u32>,

    /// Repository name
    #[arg(long)]
    pub repo: Option<String>,

    /// Branch checked out in the pane
    #[arg(long)]
    pub branch: Option<String>,

    /// Work item this pane was launched for (default: $WT_WORK_ITEM_ID)
    #[arg(long)]
    pub work_item: Option<i64>,
}

fn main() {
    let _logging_guard = wt_core::logging::init_file(LOG_FILE);

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                let _ = err.print();
            } else {
                tracing::warn!(error = %err, "wt-hook invoked with invalid arguments");
            }
            return;
        }
    };

    let (kind, args) = cli.command.split();
    // Signals are best-effort: log and exit 0 so the assistant is never blocked.
    if let Err(e) = handle::run(kind, &args) {
        tracing::warn!(signal = %kind, error = %e, "wt-hook signal dropped");
    }
}
