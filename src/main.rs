//! Command-line entry point for the static file server.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use microstatic::{HttpServer, ServerConfig, ServerError};

/// Serve static files over HTTP/1.1 from an epoll event loop.
#[derive(Debug, Parser)]
#[command(name = "microstatic", version)]
struct Args {
    /// Port to listen on (all IPv4 interfaces)
    port: u16,

    /// Document root; request paths are appended to it
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Capacity of the work queue
    #[arg(long = "max-requests")]
    max_requests: Option<usize>,

    /// Maximum number of open client connections
    #[arg(long = "max-connections")]
    max_connections: Option<usize>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        config.addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        if let Some(root) = self.root {
            config.doc_root = root;
        }
        if let Some(workers) = self.workers {
            config.worker_threads = workers;
        }
        if let Some(max_requests) = self.max_requests {
            config.max_requests = max_requests;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        Ok(config)
    }
}

fn run(args: Args) -> Result<(), ServerError> {
    let server = HttpServer::new(args.into_config()?)?;
    server.start()
}

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => {
            info!("Bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
