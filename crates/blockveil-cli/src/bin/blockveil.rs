//! Command-line control plane for BlockVeil targets.
//!
//! Each invocation constructs a fresh target against an in-memory
//! backing device — there is no resident daemon here, so `key-set`,
//! `suspend`, and friends only demonstrate the state transition within
//! a single process run rather than mutating a long-lived target. A
//! real deployment wires these same messages into whatever maps targets
//! for the life of the system.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use blockveil_abi::target::construct;
use blockveil_core::bio::{new_page, Segment};
use blockveil_core::{Bio, Direction, SectorNumber, SECTOR_SIZE};
use blockveil_harness::MemoryDevice;
use blockveil_membrane::{Mapper, WorkerQueue};

#[derive(Debug, Parser)]
#[command(name = "blockveil")]
#[command(about = "Construct, inspect, and exercise BlockVeil encrypted targets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct TargetArgs {
    /// cipher[-chainmode[-ivmode[:ivopts]]], e.g. aes-cbc-essiv:sha256
    #[arg(long, default_value = "aes-cbc-essiv:sha256")]
    cipher_spec: String,
    /// Key in hex, or "-" for no key yet.
    #[arg(long, default_value = "-")]
    key_hex: String,
    /// IV offset added to every sector number before IV derivation.
    #[arg(long, default_value_t = 0)]
    iv_offset: u64,
    /// Name of the backing device, reported by `status` only.
    #[arg(long, default_value = "/dev/loop0")]
    device_name: String,
    /// First sector of the backing device this target maps to.
    #[arg(long, default_value_t = 0)]
    start_sector: SectorNumber,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Construct a target and print its status line.
    Construct {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Construct a target, then install a new key while suspended.
    KeySet {
        #[command(flatten)]
        target: TargetArgs,
        /// The replacement key, hex-encoded, same length as the original.
        new_key_hex: String,
    },
    /// Construct a target, then wipe its key while suspended.
    KeyWipe {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Construct a target, suspend it, and report the suspended flag.
    Suspend {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Construct a target, resume it, and report preresume's verdict.
    Resume {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Round-trip a buffer of plaintext through the target against an
    /// in-memory backing device, to demonstrate the write/read path.
    SelfTest {
        #[command(flatten)]
        target: TargetArgs,
        /// Number of 512-byte sectors to round-trip.
        #[arg(long, default_value_t = 4)]
        sectors: usize,
    },
}

fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_env("BLOCKVEIL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::FAILURE
        }
    }
}

fn build(target: &TargetArgs) -> Result<blockveil_abi::ConstructedTarget, String> {
    let device = Arc::new(MemoryDevice::new());
    construct(&target.cipher_spec, &target.key_hex, target.iv_offset, &target.device_name, target.start_sector, device)
        .map_err(|e| format!("{e:?}"))
}

fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Construct { target } => {
            let ct = build(&target)?;
            println!("{}", blockveil_abi::status::table(&ct));
            Ok(())
        }
        Command::KeySet { target, new_key_hex } => {
            let ct = build(&target)?;
            ct.target.postsuspend();
            blockveil_abi::message::dispatch(&ct, &["key", "set", &new_key_hex]).map_err(|e| format!("{e:?}"))?;
            println!("{}", blockveil_abi::status::table(&ct));
            Ok(())
        }
        Command::KeyWipe { target } => {
            let ct = build(&target)?;
            ct.target.postsuspend();
            blockveil_abi::message::dispatch(&ct, &["key", "wipe"]).map_err(|e| format!("{e:?}"))?;
            println!("{}", blockveil_abi::status::table(&ct));
            Ok(())
        }
        Command::Suspend { target } => {
            let ct = build(&target)?;
            blockveil_abi::lifecycle::postsuspend(&ct);
            println!("suspended={}", ct.target.is_suspended());
            Ok(())
        }
        Command::Resume { target } => {
            let ct = build(&target)?;
            blockveil_abi::lifecycle::resume(&ct);
            match blockveil_abi::lifecycle::preresume(&ct) {
                Ok(()) => {
                    println!("resumed");
                    Ok(())
                }
                Err(e) => Err(format!("preresume refused: {e:?}")),
            }
        }
        Command::SelfTest { target, sectors } => self_test(&target, sectors),
    }
}

fn self_test(target: &TargetArgs, sectors: usize) -> Result<(), String> {
    let ct = build(target)?;
    println!("{}", blockveil_abi::status::table(&ct));

    let mapper = Mapper::new(ct.target.clone(), Arc::new(WorkerQueue::new(2)));
    let plaintext: Vec<u8> = (0..sectors * SECTOR_SIZE).map(|i| (i % 256) as u8).collect();

    let page = new_page(plaintext.len());
    page.lock().copy_from_slice(&plaintext);
    let write_bio = Bio::new(vec![Segment::new(page, 0, plaintext.len())], 0, Direction::Encrypt);

    let (write_tx, write_rx) = std::sync::mpsc::channel();
    mapper
        .submit(write_bio, move |_bio, res| write_tx.send(res).unwrap())
        .map_err(|e| format!("{e:?}"))?;
    write_rx.recv_timeout(std::time::Duration::from_secs(5)).map_err(|_| "write timed out".to_string())?.map_err(|e| format!("{e:?}"))?;

    let read_page = new_page(plaintext.len());
    let read_bio = Bio::new(vec![Segment::new(read_page.clone(), 0, plaintext.len())], 0, Direction::Decrypt);
    let (read_tx, read_rx) = std::sync::mpsc::channel();
    mapper
        .submit(read_bio, move |_bio, res| read_tx.send(res).unwrap())
        .map_err(|e| format!("{e:?}"))?;
    read_rx.recv_timeout(std::time::Duration::from_secs(5)).map_err(|_| "read timed out".to_string())?.map_err(|e| format!("{e:?}"))?;

    if *read_page.lock() == plaintext {
        println!("self-test ok: {sectors} sectors round-tripped");
        Ok(())
    } else {
        Err("round trip mismatch".to_string())
    }
}
