//! CLI entry point for the sending side.
use clap::Parser;
use log::error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use urft::{send_file, TransferConfig};

/// Send a file to a listening URFT receiver.
#[derive(Parser, Debug)]
#[command(name = "urft-client", version, about)]
struct Args {
    /// File to transfer.
    file_path: PathBuf,
    /// Receiver IP address.
    server_ip: IpAddr,
    /// Receiver UDP port.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    server_port: u16,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if !args.file_path.is_file() {
        error!("{} does not exist or is not a file", args.file_path.display());
        return ExitCode::FAILURE;
    }

    let server = SocketAddr::new(args.server_ip, args.server_port);
    match send_file(&args.file_path, server, &TransferConfig::default()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("transfer failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
