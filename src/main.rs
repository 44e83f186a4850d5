//! Binary entrypoint for the meshops console.
//!
//! Commands:
//! - `console [--simulate]` - run the interactive operator console
//! - `init` - create a starter `config.toml`
//! - `status` - print the effective configuration as JSON
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use meshops::config::Config;
use meshops::console::Console;
use meshops::link::{sim, GatewayLink};

#[derive(Parser)]
#[command(name = "meshops")]
#[command(about = "An operations console for gateway-fronted wireless mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive operator console
    Console {
        /// Drive the link with the built-in gateway simulator instead of an
        /// external transport bridge
        #[arg(long)]
        simulate: bool,
    },
    /// Initialize a new configuration file
    Init,
    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Console { simulate } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting meshops v{}", env!("CARGO_PKG_VERSION"));

            let (link, backend) = GatewayLink::channel();
            if simulate {
                info!("Driving the link with the built-in gateway simulator");
                sim::spawn(backend, sim::SimConfig::default());
            } else {
                // Without a bridge the console still runs; commands time out
                // against their acknowledgement deadline.
                log::warn!(
                    "No transport bridge attached; pass --simulate for a dry run \
                     or attach a broker client to the link backend"
                );
                tokio::spawn(async move {
                    let mut backend = backend;
                    while let Some(request) = backend.request_rx.recv().await {
                        log::debug!(
                            "no transport bridge; dropping request for gateway {}",
                            request.gateway_id()
                        );
                    }
                });
            }

            let mut console = Console::new(config, link);
            console.run().await?;
        }
        Commands::Init => {
            info!("Initializing new meshops configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let payload = serde_json::json!({
                "config": cli.config,
                "broker": format!("{}:{}", config.mqtt.host, config.mqtt.port),
                "username": config.mqtt.username,
                "silence_timeout_secs": config.console.silence_timeout_secs,
                "ack_timeout_secs": config.console.ack_timeout_secs,
                "update_countdown_secs": config.console.update_countdown_secs,
            });
            println!("{}", payload);
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => match config.as_ref().map(|c| c.logging.level.as_str()) {
            Some("debug") => log::LevelFilter::Debug,
            Some("trace") => log::LevelFilter::Trace,
            Some("warn") => log::LevelFilter::Warn,
            _ => log::LevelFilter::Info,
        },
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // When stdout is not a terminal the console output itself is being
            // captured; keep the log lines out of it and in the file only.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
