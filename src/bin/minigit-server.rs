use clap::Parser;
use minigit_server::Server;

/// Minimal network-accessible, delta-compressed, content-addressed
/// version-control service for binary blobs.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Repository directory (created if it doesn't exist)
    #[arg(long, default_value = "./minigit_repo")]
    repo: std::path::PathBuf,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> minigit_server::Result<()> {
    let addr = format!("0.0.0.0:{}", cli.port);
    log::info!("starting minigit server on port {}", cli.port);
    log::info!("repository path: {}", cli.repo.display());

    let mut server = Server::bind(&addr, cli.repo)?;
    server.run()
}
