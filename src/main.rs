//! Cachebus server binary.
//!
//! Parses the command line, sets up logging, and runs both protocol
//! endpoints until Ctrl+C.

use cachebus::server::{self, ServerConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Server configuration
struct Config {
    /// Host to bind both endpoints to
    host: String,
    /// memcached text protocol port
    memcached_port: u16,
    /// RESP / notification port
    resp_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            memcached_port: cachebus::DEFAULT_MEMCACHED_PORT,
            resp_port: cachebus::DEFAULT_RESP_PORT,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--memcached-port" | "-p" => {
                    config.memcached_port = parse_port(&args, i);
                    i += 2;
                }
                "--resp-port" | "-r" => {
                    config.resp_port = parse_port(&args, i);
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("cachebus version {}", cachebus::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            memcached_addr: format!("{}:{}", self.host, self.memcached_port),
            resp_addr: format!("{}:{}", self.host, self.resp_port),
        }
    }
}

fn parse_port(args: &[String], i: usize) -> u16 {
    let Some(value) = args.get(i + 1) else {
        eprintln!("Error: {} requires a value", args[i]);
        std::process::exit(1);
    };
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid port number '{}'", value);
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
cachebus - A memcached-compatible in-memory cache with a notification bus

USAGE:
    cachebus [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Host to bind to (default: 127.0.0.1)
    -p, --memcached-port <PORT>  memcached endpoint port (default: 11211)
    -r, --resp-port <PORT>       RESP/notification endpoint port (default: 11311)
    -v, --version                Print version information
        --help                   Print this help message

EXAMPLES:
    cachebus                              # 127.0.0.1:11211 and 127.0.0.1:11311
    cachebus --memcached-port 21211       # custom storage port
    cachebus --host 0.0.0.0               # listen on all interfaces

CONNECTING:
    Storage side, with any memcached client or nc:
    $ printf 'set foo 0 0 3\r\nbar\r\nget foo\r\n' | nc 127.0.0.1 11211

    Notification side, with redis-cli:
    $ redis-cli -p 11311 PSUBSCRIBE '__keyevent@0__:*'
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    info!(version = cachebus::VERSION, "starting cachebus");

    // Set up graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping server...");
    };

    server::run(config.server_config(), shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}
