use flytrap_cli::{daemon, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_target(false)
        .init();

    if let Err(e) = daemon::run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
