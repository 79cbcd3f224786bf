use {
    clap::Parser,
    tally::{Tally, config::TallyServerConfig, logging::init_logging},
    tracing::error,
};

#[derive(Parser)]
#[command(version, about = "Points ledger server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match TallyServerConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load server config file: {e}");
            return;
        }
    };

    if let Err(e) = init_logging(config.debug) {
        eprintln!("Error: failed to initialize logging: {e}");
        return;
    }

    let mut app = match Tally::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to open the ledger: {}", e);
            return;
        }
    };

    if let Err(e) = app.run().await {
        error!("Tally failed to run: {}", e);
    }
}
