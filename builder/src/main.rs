// Licensed under the Apache-2.0 license

use boot_config::DEFAULT_UPDATE_CONFIG;
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use image_builder::{
    flash_image, image_create, simulate, AssembleError, AssemblerConfig, HeaderSpec,
    ImageCreateArgs, SimulateArgs,
};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Intel-HEX to binary firmware image tool", long_about = None)]
struct Hex2Bin {
    /// Print debug output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Combine Intel-HEX files into one binary, optionally with an image header
    Assemble {
        /// Input files, processed in order; later data overwrites earlier data
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Only output bytes at addresses >= LOW_ADDR; output starts there
        #[arg(short = 'c', long = "clip", value_name = "LOW_ADDR", value_parser = maybe_hex::<u32>)]
        low_address: Option<u32>,

        /// Leading header as TYPE[,START]; only type 0 is defined
        #[arg(long)]
        header: Option<HeaderSpec>,

        /// Output file; without it the inputs are only checked
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Header timestamp in unix seconds instead of the current time
        #[arg(long, value_parser = maybe_hex::<u32>)]
        timestamp: Option<u32>,

        /// Size of the assembly buffer in bytes
        #[arg(long, value_parser = maybe_hex::<usize>, default_value = "0x200000")]
        capacity: usize,
    },
    /// Check the header, size and CRC of an image file
    Verify { file: PathBuf },
    /// Print the header of an image file
    Info { file: PathBuf },
    /// Run the boot ROM update flow on a memory image file and a storage directory
    Simulate {
        /// Program memory image; created erased if missing and updated in place
        #[arg(long)]
        flash: PathBuf,

        /// Directory holding the candidate image
        #[arg(long)]
        storage: PathBuf,

        #[arg(long, value_parser = maybe_hex::<usize>, default_value = "0x100000")]
        flash_size: usize,

        #[arg(long, value_parser = maybe_hex::<usize>, default_value = "0x1000")]
        page_size: usize,

        #[arg(long, value_parser = maybe_hex::<u32>, default_value = "0xFF000")]
        record_address: u32,
    },
}

fn main() {
    let cli = Hex2Bin::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("Logger init failed: {}", e);
    }

    let result: anyhow::Result<()> = match &cli.command {
        Commands::Assemble {
            inputs,
            low_address,
            header,
            output,
            timestamp,
            capacity,
        } => image_create(&ImageCreateArgs {
            inputs,
            low_address: *low_address,
            header: *header,
            output: output.as_deref(),
            timestamp: *timestamp,
            config: AssemblerConfig {
                capacity: *capacity,
                ..AssemblerConfig::default()
            },
        })
        .map(|_| ())
        .map_err(anyhow::Error::from),
        Commands::Verify { file } => flash_image::image_verify(file).map(|_| ()),
        Commands::Info { file } => flash_image::image_info(file),
        Commands::Simulate {
            flash,
            storage,
            flash_size,
            page_size,
            record_address,
        } => simulate(&SimulateArgs {
            flash,
            storage,
            capacity: *flash_size,
            config: boot_config::UpdateConfig {
                installed_record_address: *record_address,
                page_size: *page_size,
                ..DEFAULT_UPDATE_CONFIG
            },
        })
        .map(|outcome| println!("Status: {}", outcome.status_code())),
    };

    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        let code = e
            .downcast_ref::<AssembleError>()
            .map_or(1, AssembleError::exit_code);
        std::process::exit(code);
    });
}
