use std::{io::Write, path::PathBuf};

use anyhow::Result;
use clap::Parser;
use libsic::Machine;
use sicload::{parse_hex_address, run};

/// Relocating loader for SIC and SIC/XE object programs
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Object program to load
    object_file: PathBuf,

    /// Address to relocate the program to, in hex
    #[arg(value_parser = parse_hex_address)]
    address: u32,

    /// Target machine, SIC or SICXE
    #[arg(value_parser = parse_machine)]
    machine: Machine,
}

fn parse_machine(arg: &str) -> Result<Machine, String> {
    arg.parse()
        .map_err(|_| format!("unknown machine {:?}, use SIC or SICXE", arg))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let relocated = run(&args.object_file, args.address, args.machine)?;
    std::io::stdout().write_all(relocated.as_bytes())?;

    Ok(())
}
