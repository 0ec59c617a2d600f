use clap::Parser;
use s370_core::{Configuration, Emulator};
use std::fs;
use std::process::ExitCode;

/// Runs the System/370 CPU core against an IPL image.
#[derive(Parser, Debug)]
#[command(name = "s370emu", version, about)]
struct Args {
    /// Path to the IPL image loaded at the base address before restart.
    image: String,

    /// Base address the IPL image is loaded at.
    #[arg(long, default_value_t = 0)]
    base_address: usize,

    /// Memory size in kilobytes.
    #[arg(long, default_value_t = 16 * 1024)]
    memory_kb: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match Configuration::ipl_default().with_memory_kb(args.memory_kb) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut emulator = Emulator::new(config);

    let image = match fs::read(&args.image) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read {}: {e}", args.image);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = emulator.load_ipl_image(&image, args.base_address) {
        eprintln!("failed to load IPL image: {e}");
        return ExitCode::FAILURE;
    }

    emulator.run();
    ExitCode::SUCCESS
}
