// serbridge - serial port / pty to TCP bridge
use clap::Parser;
use serbridge::cli::{execute, Args};

fn main() {
    let args = Args::parse();

    if let Err(e) = execute(args) {
        eprintln!("serbridge: {}", e);
        std::process::exit(e.exit_code());
    }
}
