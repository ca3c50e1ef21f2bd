//! Thin client for the admin verbs: one JSON line out, one JSON line back,
//! over the Unix-domain socket `ste-agent` listens on.

use eyre::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use ste_core::ipc::{default_socket_path, AdminRequest, AdminResponse};

pub async fn call(plans_dir: &std::path::Path, request: AdminRequest) -> Result<AdminResponse> {
    let socket_path = default_socket_path(plans_dir);
    let stream = UnixStream::connect(&socket_path).await.with_context(|| {
        format!(
            "connect to ste-agent at {} (is it running?)",
            socket_path.display()
        )
    })?;

    let (read_half, mut write_half) = stream.into_split();
    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.shutdown().await?;

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await?;
    if response_line.is_empty() {
        bail!("ste-agent closed the connection without responding");
    }

    let response: AdminResponse = serde_json::from_str(response_line.trim_end())?;
    if let AdminResponse::Error(msg) = &response {
        bail!("{msg}");
    }
    Ok(response)
}
