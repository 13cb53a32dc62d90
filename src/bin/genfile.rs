//! Random test-file generator for exercising transfers.
use clap::Parser;
use rand::RngCore;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Create a binary file of random bytes.
#[derive(Parser, Debug)]
#[command(name = "urft-genfile", version, about)]
struct Args {
    /// Where to write the file.
    #[arg(default_value = "test_file.bin")]
    path: PathBuf,
    /// File size in bytes.
    #[arg(long, default_value_t = 1_048_576)]
    size: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match generate(&args) {
        Ok(()) => {
            println!("created {} ({} bytes)", args.path.display(), args.size);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("cannot write {}: {}", args.path.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn generate(args: &Args) -> io::Result<()> {
    if let Some(dir) = args.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let mut file = File::create(&args.path)?;
    let mut rng = rand::thread_rng();
    let mut block = vec![0u8; 64 * 1024];
    let mut remaining = args.size;

    while remaining > 0 {
        let len = remaining.min(block.len() as u64) as usize;
        rng.fill_bytes(&mut block[..len]);
        file.write_all(&block[..len])?;
        remaining -= len as u64;
    }
    file.sync_all()
}
