//! `hooksy daemon start|stop|status`: the dashboard daemon lives outside this
//! gateway's core, so these commands are honest stubs rather than a fake
//! process manager.

use anyhow::{bail, Result};

use crate::cli::DaemonCommands;

pub fn run(command: DaemonCommands) -> Result<()> {
    match command {
        DaemonCommands::Start | DaemonCommands::Stop => {
            bail!("daemon lifecycle management is not implemented outside this gateway's core")
        }
        DaemonCommands::Status => {
            println!("daemon: not running");
            Ok(())
        }
    }
}
