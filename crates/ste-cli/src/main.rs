mod admin;
mod cli;
mod copy;
mod exit_code;
mod ipc_client;

use clap::Parser;
use eyre::Result;
use ste_core::config;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let Cli {
        config_dir,
        command,
    } = Cli::parse();

    if let Some(dir) = config_dir.as_ref() {
        config::set_config_dir(dir);
    }

    let plans_dir = config::plans_dir()?;

    match command {
        Commands::Copy(args) => {
            let code = copy::run_copy(&args).await?;
            std::process::exit(code);
        }
        Commands::List(args) => admin::run_list(&plans_dir, &args).await?,
        Commands::Status(args) => admin::run_status(&plans_dir, &args).await?,
        Commands::Pause(args) => admin::run_pause(&plans_dir, &args).await?,
        Commands::Cancel(args) => admin::run_cancel(&plans_dir, &args).await?,
        Commands::Resume(args) => admin::run_resume(&plans_dir, &args).await?,
        Commands::Remove(args) => admin::run_remove(&plans_dir, &args).await?,
        Commands::Clean(args) => admin::run_clean(&plans_dir, &args).await?,
    }

    Ok(())
}
