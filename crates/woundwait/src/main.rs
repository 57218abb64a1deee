use anyhow::Result;
use woundwait::cli::{build_cli, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let matches = build_cli().get_matches();
    woundwait::cli::handlers::dispatch(&matches).await
}
