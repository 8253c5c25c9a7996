//! Command handlers. Each module owns one subcommand family; `dispatch`
//! routes a parsed CLI invocation to it.

pub mod config_cmd;
pub mod devices;
pub mod discover;
pub mod provision;
pub mod server_cmd;

use crate::cli::{Command, GlobalOpts};
use crate::context::AppContext;
use crate::error::CliError;

pub async fn dispatch(
    command: Command,
    context: &AppContext,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match command {
        Command::List(args) => devices::list(context, args, global).await,
        Command::Add(args) => devices::add(context, args, global).await,
        Command::Discover(args) => discover::run(context, args, global).await,
        Command::ScanAp => provision::scan_ap(context, global).await,
        Command::Provision(args) => provision::run(context, args, global).await,
        Command::Server => server_cmd::run(context).await,
        // Config and Completions are handled before a context exists.
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
