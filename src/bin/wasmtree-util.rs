//! wasmtree command-line tool.

use anyhow::{bail, Result};
use log::debug;
use std::path::PathBuf;
use structopt::StructOpt;
use wasmtree::{generate_names, resolve_names, Errors, FrontendOptions, Module, WriteBinaryOptions};

#[derive(Debug, StructOpt)]
#[structopt(name = "wasmtree-util", about = "wasmtree utility.")]
struct Options {
    #[structopt(short, long)]
    debug: bool,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    #[structopt(name = "print-ir", about = "Parse Wasm and print resulting IR")]
    PrintIR {
        #[structopt(help = "Wasm file to parse")]
        wasm: PathBuf,
    },
    #[structopt(name = "roundtrip", about = "Round-trip Wasm through the IR")]
    RoundTrip {
        #[structopt(short = "i", help = "Input Wasm module")]
        input: PathBuf,
        #[structopt(short = "o", help = "Output Wasm module")]
        output: PathBuf,
        #[structopt(long, help = "Pad sizes to five-byte LEBs")]
        no_canonical_lebs: bool,
        #[structopt(long, help = "Emit linking and relocation sections")]
        relocatable: bool,
        #[structopt(long, help = "Emit a name section")]
        debug_names: bool,
        #[structopt(long, help = "Name unnamed entities before writing")]
        generate_names: bool,
    },
    #[structopt(name = "resolve", about = "Resolve names and report problems")]
    Resolve {
        #[structopt(help = "Wasm file to parse")]
        wasm: PathBuf,
    },
}

fn read_module(path: &PathBuf) -> Result<Module> {
    let bytes = std::fs::read(path)?;
    debug!("Loaded {} bytes of Wasm data", bytes.len());
    Module::from_wasm_bytes(&bytes[..], &FrontendOptions::default())
}

fn main() -> Result<()> {
    let opts = Options::from_args();

    let mut logger = env_logger::Builder::from_default_env();
    if opts.debug {
        logger.filter_level(log::LevelFilter::Debug);
    }
    let _ = logger.try_init();

    match opts.command {
        Command::PrintIR { wasm } => {
            let module = read_module(&wasm)?;
            println!("{}", module.display());
        }
        Command::RoundTrip {
            input,
            output,
            no_canonical_lebs,
            relocatable,
            debug_names,
            generate_names: generate,
        } => {
            let mut module = read_module(&input)?;
            if generate && generate_names(&mut module).is_error() {
                bail!("could not generate names");
            }
            let options = WriteBinaryOptions {
                canonicalize_lebs: !no_canonical_lebs,
                relocatable,
                write_debug_names: debug_names,
            };
            let bytes = module.to_wasm_bytes_with(&options)?;
            debug!("Writing {} bytes to {}", bytes.len(), output.display());
            std::fs::write(output, bytes)?;
        }
        Command::Resolve { wasm } => {
            let mut module = read_module(&wasm)?;
            let mut errors = Errors::new();
            if resolve_names(&mut module, &mut errors).is_error() {
                for e in &errors {
                    eprintln!("{}", e);
                }
                bail!("{} error(s) while resolving names", errors.len());
            }
            println!("{}", module.display());
        }
    }

    Ok(())
}
