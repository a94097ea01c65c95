use std::path::PathBuf;

use clap::Parser;
use spider_crawler_runtime::config::CrawlerConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Spider crawler motor runtime")]
struct Args {
    /// JSON config file; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run the loop without opening the serial devices
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match CrawlerConfig::load(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(1);
            }
        },
        None => CrawlerConfig::default(),
    };

    if let Err(e) = spider_crawler_runtime::runtime::run(config, args.dry_run).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
