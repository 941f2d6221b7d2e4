//! The thin command-line surface: launching the long-lived connection is the only operation in
//! scope for this crate's own binary (general RPC, such as an ad hoc `send-option` subcommand,
//! is explicitly out of scope).

use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "sentrynoded")]
pub enum Cli {
    /// Start the session, watchdog, and receiver, and block until shutdown.
    Run {
        #[structopt(long, short, parse(from_os_str))]
        config: Option<PathBuf>,
    },
}
