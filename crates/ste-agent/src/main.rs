mod service;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{bail, Context, Result};
use ste_core::config;
use ste_core::ipc;
use ste_core::jobs_admin::JobsAdmin;

#[derive(Parser, Debug)]
#[command(name = "ste-agent", about = "Background driver for paused/resumed transfer jobs")]
struct AgentArgs {
    /// Override the configuration directory for this invocation
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

fn write_pidfile(plans_dir: &std::path::Path) -> Result<PathBuf> {
    use std::io::Write;

    let pid = std::process::id();
    let path = ipc::pidfile_path(plans_dir, pid);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("create pidfile {}", path.display()))?;
    write!(file, "{pid}")?;
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let args = AgentArgs::parse();
    if let Some(dir) = args.config_dir.as_ref() {
        config::set_config_dir(dir);
    }

    let plans_dir = config::plans_dir()?;
    std::fs::create_dir_all(&plans_dir)?;

    let socket_path = ipc::default_socket_path(&plans_dir);
    if socket_path.exists() && tokio::net::UnixStream::connect(&socket_path).await.is_ok() {
        bail!(
            "an agent is already listening on {} - stop it first",
            socket_path.display()
        );
    }

    let pidfile = write_pidfile(&plans_dir)?;
    log::info!("wrote pidfile {}", pidfile.display());

    let admin = Arc::new(JobsAdmin::new(plans_dir.clone()));
    let found = admin.discover()?;
    if found > 0 {
        log::info!("discovered {found} job(s) left on disk");
    }

    let result = service::serve(admin, socket_path).await;
    let _ = std::fs::remove_file(&pidfile);
    result
}
