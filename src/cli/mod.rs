//! Command-line interface for inspecting and simulating the bus.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::protocol::MessageType;
use crate::types::{Address, SequenceNumber};

/// ktane-bus - shared serial bus node tools
#[derive(Parser, Debug)]
#[command(
    name = "ktane-bus",
    author,
    version,
    about = "Frame tools and simulator for the half-duplex module bus",
    long_about = r#"
ktane-bus works with the frames exchanged between puzzle modules and the
game controller on a shared half-duplex serial line:

  - Encode and decode checksummed frames
  - Simulate a module and the controller on an in-memory bus
  - Print an example node configuration

QUICK START:
  ktane-bus encode --kind strike --seq 3
  ktane-bus decode 06100000000603e0ff
  ktane-bus simulate --event disarm --drop 2
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a frame and print it as hex
    Encode(EncodeArgs),

    /// Parse hex-encoded frames
    Decode(DecodeArgs),

    /// Run a module and a controller against each other on a simulated bus
    Simulate(SimulateArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Encode command arguments
#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Source address (decimal or 0x-hex)
    #[arg(short, long, default_value = "0x10")]
    pub source: Address,

    /// Destination address (decimal or 0x-hex)
    #[arg(short, long, default_value = "0x00")]
    pub dest: Address,

    /// Message kind, by name or code
    #[arg(short, long)]
    pub kind: MessageType,

    /// Sequence number
    #[arg(long, default_value = "0")]
    pub seq: u8,

    /// Payload bytes as hex
    #[arg(short, long)]
    pub payload: Option<String>,
}

impl EncodeArgs {
    pub fn sequence(&self) -> SequenceNumber {
        SequenceNumber(self.seq)
    }
}

/// Decode command arguments
#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Hex-encoded bytes, one or more frames back to back
    #[arg(required = true)]
    pub frames: Vec<String>,
}

/// Simulate command arguments
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Game event the module reports once armed
    #[arg(short, long, value_enum, default_value = "strike")]
    pub event: SimEvent,

    /// Drop this many frames written after the module is armed
    #[arg(long, default_value = "0")]
    pub drop: usize,

    /// Maximum ticks to run
    #[arg(long, default_value = "500")]
    pub ticks: u32,

    /// Simulated milliseconds per tick
    #[arg(long, default_value = "10")]
    pub tick_ms: u64,

    /// Module address
    #[arg(long, default_value = "0x10")]
    pub module: Address,

    /// Seed for the backoff RNG
    #[arg(long)]
    pub seed: Option<u64>,
}

impl SimulateArgs {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Game event reported by the simulated module
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SimEvent {
    /// Report a strike
    Strike,
    /// Report the module solved
    Disarm,
    /// Report a failure to arm
    UnableToArm,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
