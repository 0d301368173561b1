use anyhow::Result;
use clap::Parser;
use connect_tunnel::cli::{execute_command, Cli};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // 日志写到 stderr，stdout 留给响应体
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    debug!("Connect Tunnel v{}", env!("CARGO_PKG_VERSION"));

    execute_command(&cli).await
}
