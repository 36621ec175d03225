mod arith;
mod batch;
mod challenge_parser;
mod challenge_solver;
mod cometd;
mod config;
mod network_client;
mod session;
mod transport;
mod utils;

#[cfg(test)]
mod testing;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{debug, info};

use crate::batch::BatchPlan;
use crate::config::ClientConfig;
use crate::network_client::LiveTransport;
use crate::session::Outcome;

// Custom Application Error Type
#[derive(Debug)]
enum AppError {
    Io(std::io::Error),
    InvalidInput(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "IO error: {}", err),
            AppError::InvalidInput(err) => write!(f, "Invalid input: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::InvalidInput(_) => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

/// Joins a live quiz game with a batch of generated players.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Game PIN (prompted for when omitted)
    #[clap(long)]
    pin: Option<u32>,

    /// Number of players to join (prompted for when omitted)
    #[clap(long)]
    count: Option<usize>,

    /// File with one `host:port` proxy per line
    #[clap(long, default_value = "proxies.txt")]
    proxies: PathBuf,

    /// Delay between session launches, in milliseconds
    #[clap(long, default_value_t = 300)]
    delay_ms: u64,

    #[clap(long, default_value = utils::DEFAULT_PREFIX)]
    prefix: String,

    #[clap(long, default_value = config::DEFAULT_HOST)]
    host: String,

    /// Maximum wait for each protocol reply, in seconds
    #[clap(long, default_value_t = 30)]
    reply_timeout_secs: u64,

    #[clap(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// How long a joined player stays connected before disconnecting, in milliseconds
    #[clap(long, default_value_t = 1000)]
    linger_ms: u64,

    /// Verify TLS certificates (off by default)
    #[clap(long)]
    verify_certs: bool,
}

fn prompt<T: FromStr>(label: &str) -> Result<T, AppError> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    line.trim()
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("'{}' is not a valid number", line.trim())))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let game_pin: u32 = match args.pin {
        Some(pin) => pin,
        None => prompt("Enter Kahoot PIN: ")?,
    };
    let count: usize = match args.count {
        Some(count) => count,
        None => prompt("Enter number of bots: ")?,
    };

    let proxies = config::load_proxies(&args.proxies);
    if proxies.is_empty() {
        println!("Running without proxies");
    } else {
        println!("Using {} proxies from {}", proxies.len(), args.proxies.display());
    }

    let client_config = Arc::new(ClientConfig {
        host: args.host,
        accept_invalid_certs: !args.verify_certs,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        reply_timeout: Duration::from_secs(args.reply_timeout_secs),
        linger: Duration::from_millis(args.linger_ms),
        ..ClientConfig::default()
    });
    info!("Client config: {:?}", client_config);

    let plan = BatchPlan {
        proxies,
        launch_delay: Duration::from_millis(args.delay_ms),
        name_prefix: args.prefix,
        ..BatchPlan::new(game_pin, count)
    };

    println!("Starting {} bots...", count);
    let result = batch::run_batch(&plan, Arc::clone(&client_config), |_, proxy| {
        LiveTransport::new(Arc::clone(&client_config), proxy)
    })
    .await;

    for (index, outcome) in result.outcomes.iter().enumerate() {
        if let Outcome::Failed(reason) = outcome {
            debug!("Bot {} failed: {}", index, reason);
        }
    }
    if result.failed() > 0 {
        info!("{} bots did not join", result.failed());
    }

    println!("Successfully joined: {}/{}", result.succeeded, result.total_requested);
    Ok(())
}
