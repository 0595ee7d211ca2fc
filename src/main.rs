//! ktane-bus CLI - frame tools and bus simulator.

use bytes::BytesMut;
use clap::Parser;
use colored::Colorize;
use tokio_util::codec::Decoder;

use ktane_bus::cli::*;
use ktane_bus::clock::ManualClock;
use ktane_bus::config::{init_logging, Config};
use ktane_bus::error::Result;
use ktane_bus::protocol::{FrameCodec, MessageType, Packet};
use ktane_bus::session::{NodeSession, SessionEvent};
use ktane_bus::transport::{BusRecord, MemoryBus, MemoryLine};
use ktane_bus::types::{Address, Mode, NodeStats};
use ktane_bus::VERSION;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Load config if specified
    let config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_config = ktane_bus::config::LoggingConfig {
        level: cli.log_level.clone(),
        color: !cli.no_color,
        ..config.logging.clone()
    };
    init_logging(&log_config)?;

    // Dispatch command
    match cli.command {
        Commands::Encode(args) => run_encode(&args),
        Commands::Decode(args) => run_decode(&args),
        Commands::Simulate(args) => run_simulate(&args, config),
        Commands::Config(args) => run_config(&args),
    }
}

fn run_encode(args: &EncodeArgs) -> Result<()> {
    let payload = match args.payload {
        Some(ref hex_payload) => hex::decode(hex_payload).map_err(anyhow::Error::from)?,
        None => Vec::new(),
    };

    let packet = Packet::new(args.source, args.dest, args.kind, args.sequence(), payload)?;
    let frame = packet.encode()?;

    println!("{}", hex::encode(&frame).bright_green());
    println!("  {} {}", "→".cyan(), describe(&packet));
    Ok(())
}

fn run_decode(args: &DecodeArgs) -> Result<()> {
    let mut buf = BytesMut::new();
    for frame in &args.frames {
        let bytes = hex::decode(frame.trim()).map_err(anyhow::Error::from)?;
        buf.extend_from_slice(&bytes);
    }

    let mut codec = FrameCodec::new();
    let mut decoded = 0;
    let mut failed = 0;

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(packet)) => {
                decoded += 1;
                println!("{} {}", "✓".green(), describe(&packet));
            }
            Ok(None) => break,
            Err(e) => {
                failed += 1;
                println!("{} {}", "✗".red(), e);
            }
        }
    }

    match codec.decode_eof(&mut buf) {
        Ok(Some(packet)) => {
            decoded += 1;
            println!("{} {}", "✓".green(), describe(&packet));
        }
        Ok(None) => {}
        Err(e) => {
            failed += 1;
            println!("{} {}", "✗".red(), e);
        }
    }

    println!();
    println!("{decoded} frame(s) decoded, {failed} rejected");
    Ok(())
}

fn run_simulate(args: &SimulateArgs, config: Config) -> Result<()> {
    println!(
        "{} {}",
        "ktane-bus".bright_cyan().bold(),
        format!("v{VERSION}").dimmed()
    );
    println!(
        "Simulating module {} against controller {} ({} event)",
        args.module,
        Address::CONTROLLER,
        format!("{:?}", args.event).to_lowercase()
    );
    println!();

    let bus = MemoryBus::new();
    let clock = ManualClock::new();

    let mut module_config = config.clone();
    module_config.node.address = args.module;
    module_config.node.controller = Address::CONTROLLER;
    module_config.backoff.seed = args.seed.or(config.backoff.seed);

    let mut controller_config = config;
    controller_config.node.address = Address::CONTROLLER;
    controller_config.node.controller = args.module;
    controller_config.backoff.seed = module_config.backoff.seed.map(|s| s.wrapping_add(1));

    let mut module = NodeSession::new(&module_config, bus.attach(), clock.clone())?;
    let mut controller = NodeSession::new(&controller_config, bus.attach(), clock.clone())?;

    controller.queue_send(args.module, MessageType::Configure, Vec::new())?;
    controller.queue_send(args.module, MessageType::Start, Vec::new())?;

    let mut fired = false;
    let mut reported = false;

    for _ in 0..args.ticks {
        for event in module.poll() {
            print_event(&clock, "module", &event);
        }
        for event in controller.poll() {
            if let SessionEvent::Received(ref packet) = event {
                reported |= packet.message_type.is_game_critical();
            }
            print_event(&clock, "controller", &event);
        }

        if !fired && module.mode() == Mode::Armed {
            bus.drop_next(args.drop);
            fire(&mut module, args.event)?;
            fired = true;
        }

        let settled = module.delivery().is_empty() && controller.delivery().is_empty();
        if reported && settled {
            break;
        }

        clock.advance(args.tick());
    }

    println!();
    println!("{}", "Bus transcript:".bright_white().bold());
    println!("{}", "─".repeat(60));
    let module_tap = module.transport().line().tap();
    for record in bus.history() {
        print_record(&record, module_tap);
    }
    println!("{}", "─".repeat(60));
    println!();

    print_stats("Module", &module);
    print_stats("Controller", &controller);

    if reported {
        println!("{} Event delivered in {:?}", "✓".green(), clock.elapsed());
    } else {
        println!("{} Event not delivered after {} ticks", "✗".red(), args.ticks);
    }
    Ok(())
}

fn run_config(args: &ConfigArgs) -> Result<()> {
    let config = Config::example();

    let output = toml::to_string_pretty(&config).map_err(anyhow::Error::from)?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{output}");
    }

    Ok(())
}

fn fire(module: &mut NodeSession<MemoryLine, ManualClock>, event: SimEvent) -> Result<()> {
    match event {
        SimEvent::Strike => module.strike(),
        SimEvent::Disarm => module.disarmed(),
        SimEvent::UnableToArm => module.unable_to_arm(),
    }
}

fn describe(packet: &Packet) -> String {
    let mut line = format!(
        "{} {} → {} seq {}",
        packet.message_type, packet.source, packet.dest, packet.seq
    );
    if !packet.payload.is_empty() {
        line.push_str(&format!(" payload {}", hex::encode(&packet.payload)));
    }
    line
}

fn print_event(clock: &ManualClock, node: &str, event: &SessionEvent) {
    let at = format!("{:>8.1?}", clock.elapsed()).dimmed();
    match event {
        SessionEvent::Received(packet) => {
            println!("{at} {node:>10} {} {}", "←".cyan(), describe(packet));
        }
        SessionEvent::ModeChanged { from, to } => {
            println!("{at} {node:>10} {} {from} → {}", "●".yellow(), to.to_string().bold());
        }
        SessionEvent::Delivered {
            seq,
            message_type,
            attempts,
            latency,
            ..
        } => {
            println!(
                "{at} {node:>10} {} {message_type} seq {seq} acknowledged ({attempts} attempt(s), {latency:?})",
                "✓".green()
            );
        }
        SessionEvent::DeliveryFailed {
            seq,
            message_type,
            attempts,
            ..
        } => {
            println!(
                "{at} {node:>10} {} {message_type} seq {seq} failed after {attempts} attempt(s)",
                "✗".red()
            );
        }
    }
}

fn print_record(record: &BusRecord, module_tap: usize) {
    let writer = if record.tap == module_tap {
        "module"
    } else {
        "controller"
    };
    let summary = match Packet::decode(&record.bytes) {
        Ok(packet) => describe(&packet),
        Err(e) => e.to_string(),
    };
    let fault = match record.fault {
        Some(fault) => format!(" [{fault:?}]").red().to_string(),
        None => String::new(),
    };
    println!(
        "  {writer:>10} {} {}{fault}",
        hex::encode(&record.bytes).dimmed(),
        summary
    );
}

fn print_stats(name: &str, node: &NodeSession<MemoryLine, ManualClock>) {
    let stats: NodeStats = node.stats();
    println!("{} ({}, {})", name.bright_white().bold(), node.address(), node.mode());
    println!(
        "  sent {}  received {}  retransmitted {}  acks {}/{}  duplicates {}",
        stats.frames_sent,
        stats.frames_received,
        stats.retransmissions,
        stats.acks_sent,
        stats.acks_received,
        stats.duplicates
    );
    println!(
        "  checksum errors {}  malformed {}  short reads {}",
        stats.checksum_errors, stats.malformed_frames, stats.short_reads
    );
    println!();
}
