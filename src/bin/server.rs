//! CLI entry point for the receiving side.
use clap::Parser;
use log::error;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use urft::{Receiver, TransferConfig};

/// Receive one file over URFT and verify its integrity.
#[derive(Parser, Debug)]
#[command(name = "urft-server", version, about)]
struct Args {
    /// IP address to bind.
    server_ip: IpAddr,
    /// UDP port to bind.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    server_port: u16,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let bind_addr = SocketAddr::new(args.server_ip, args.server_port);
    let receiver = match Receiver::bind(bind_addr, TransferConfig::default()) {
        Ok(receiver) => receiver,
        Err(e) => {
            error!("cannot bind {}: {}", bind_addr, e);
            return ExitCode::FAILURE;
        }
    };

    match receiver.run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("reception failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
