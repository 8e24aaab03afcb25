//! Operator CLI for the pan/tilt capture rig.
//!
//! Subcommands:
//! - `check`: Load and validate a configuration file
//! - `jog`: One-off fine/coarse jog of a single axis
//! - `run`: Start the capture sequencer with an interactive command line

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use hardware::gimbal::Gimbal;
use hardware::gpio::{GpioBackend, HardwareContext, MockBackend};
use sequencer::state::Command as RigCommand;
use sequencer::{CaptureSequencer, CentroidLocator, DirectoryStore, SequencerEvent, SyntheticCamera};
use shared::cancel::CancelToken;
use shared::clock::SystemClock;
use shared::config::RigConfig;
use shared::types::AxisId;

/// Pan/tilt capture rig control tool
#[derive(Parser, Debug)]
#[command(name = "rig_ctl")]
#[command(about = "Control tool for the pan/tilt capture rig")]
#[command(version)]
struct Args {
    /// Path to the rig configuration file
    #[arg(short, long, global = true, default_value = "rig.json")]
    config: PathBuf,

    /// Use the recording mock backend instead of real GPIO
    #[arg(long, global = true)]
    mock: bool,

    /// GPIO character device chip name
    #[arg(long, global = true, default_value = "gpiochip0")]
    chip: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print a summary
    Check,

    /// Jog one axis and exit
    Jog {
        /// Axis to jog (pan or tilt)
        #[arg(short, long)]
        axis: String,

        /// Servo jog in degrees, relative
        #[arg(short, long)]
        fine: Option<f64>,

        /// Stepper jog in signed steps
        #[arg(short = 's', long)]
        coarse: Option<i64>,
    },

    /// Run a capture session with an interactive command prompt
    Run {
        /// Directory captures are written into
        #[arg(short, long, default_value = "captures")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Check => cmd_check(&args.config),
        Command::Jog { axis, fine, coarse } => {
            cmd_jog(&args.config, args.mock, &args.chip, &axis, fine, coarse)
        }
        Command::Run { output } => cmd_run(&args.config, args.mock, &args.chip, &output),
    }
}

fn backend(mock: bool, chip: &str) -> Result<Box<dyn GpioBackend>> {
    if mock {
        info!("using mock GPIO backend");
        return Ok(Box::new(MockBackend::new()));
    }
    real_backend(chip)
}

#[cfg(target_os = "linux")]
fn real_backend(chip: &str) -> Result<Box<dyn GpioBackend>> {
    let backend = hardware::gpio::GpiodBackend::open(chip)?;
    info!(chip, "opened GPIO chip");
    Ok(Box::new(backend))
}

#[cfg(not(target_os = "linux"))]
fn real_backend(chip: &str) -> Result<Box<dyn GpioBackend>> {
    let _ = chip;
    bail!("real GPIO requires linux; pass --mock to dry-run")
}

fn parse_axis(name: &str) -> Result<AxisId> {
    match name.to_ascii_lowercase().as_str() {
        "pan" => Ok(AxisId::Pan),
        "tilt" => Ok(AxisId::Tilt),
        other => bail!("unknown axis {other:?}, expected pan or tilt"),
    }
}

// ==================== Check Command ====================

fn cmd_check(config_path: &PathBuf) -> Result<()> {
    let config = RigConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    println!("Configuration OK: {}", config_path.display());
    println!(
        "  servo range: [{:.1}, {:.1}] deg, pulse [{}, {}] us, settle {} ms",
        config.servo.min_angle_deg,
        config.servo.max_angle_deg,
        config.servo.min_pulse_us,
        config.servo.max_pulse_us,
        config.servo.settle_ms
    );
    for axis in [AxisId::Pan, AxisId::Tilt] {
        let pins = config.pins(axis);
        println!(
            "  {axis}: servo={} dir={} step={} enable={} mode={:?} ({:?})",
            pins.servo, pins.dir, pins.step, pins.enable, pins.mode, pins.microstep
        );
    }
    println!(
        "  sequencing: mode {:?}, auto interval {} s, stabilize {} ms",
        config.sequence.mode, config.sequence.auto_interval_secs, config.sequence.stabilize_ms
    );
    println!("  poses: {}", config.poses.len());
    for pose in &config.poses {
        println!(
            "    [{}] fine ({:.1}, {:.1}) deg, coarse ({}, {}) steps",
            pose.index, pose.fine_pan, pose.fine_tilt, pose.coarse_pan, pose.coarse_tilt
        );
    }
    Ok(())
}

// ==================== Jog Command ====================

fn cmd_jog(
    config_path: &PathBuf,
    mock: bool,
    chip: &str,
    axis: &str,
    fine: Option<f64>,
    coarse: Option<i64>,
) -> Result<()> {
    if fine.is_none() && coarse.is_none() {
        bail!("must specify --fine degrees, --coarse steps, or both");
    }
    let axis = parse_axis(axis)?;
    let config = RigConfig::load(config_path)?;

    let mut ctx = HardwareContext::new(backend(mock, chip)?);
    let mut gimbal = Gimbal::from_config(&config, &mut ctx)?;
    let cancel = CancelToken::new();

    if let Some(delta_deg) = fine {
        let angle = gimbal.axis_mut(axis).jog_fine(delta_deg)?;
        info!("{axis} servo now at {angle:.1} deg");
    }
    if let Some(delta_steps) = coarse {
        let delay = Duration::from_millis(config.sequence.move_step_delay_ms);
        gimbal.axis_mut(axis).jog_coarse(delta_steps, delay, &cancel)?;
        info!(
            "{axis} stepper at {} steps (advisory)",
            gimbal.axis(axis).coarse_position()
        );
    }
    gimbal.stop()?;
    Ok(())
}

// ==================== Run Command ====================

fn cmd_run(config_path: &PathBuf, mock: bool, chip: &str, output: &PathBuf) -> Result<()> {
    let config = RigConfig::load(config_path)?;

    let mut ctx = HardwareContext::new(backend(mock, chip)?);
    let gimbal = Gimbal::from_config(&config, &mut ctx)?;
    let camera = SyntheticCamera::new(640, 480);
    let store = DirectoryStore::new(output)?;
    let locator = CentroidLocator::default();

    let mut seq = CaptureSequencer::new(
        gimbal,
        camera,
        store,
        locator,
        config.poses.clone(),
        config.sequence.clone(),
        Arc::new(SystemClock::new()),
    );
    let commands = seq.command_sender();
    let cancel = seq.cancel_handle();
    let events = seq.events();

    let printer = thread::spawn(move || {
        for event in events {
            match event {
                SequencerEvent::StateChanged { from, to } => println!("  [{from} -> {to}]"),
                SequencerEvent::Countdown(n) => println!("  capture in {n}..."),
                SequencerEvent::CaptureSaved {
                    pose_index,
                    identifier,
                } => println!("  saved pose {pose_index} as {identifier}"),
                SequencerEvent::Fault(message) => println!("  FAULT: {message}"),
            }
        }
    });
    let worker = thread::spawn(move || seq.run());

    print_help();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("q") {
            break;
        }
        let default_interval = Duration::from_secs(config.sequence.auto_interval_secs);
        match parse_command(input, default_interval) {
            Ok(command) => {
                // Reset must also abort any in-flight motion.
                if command == RigCommand::Reset {
                    cancel.cancel();
                }
                commands
                    .send(command)
                    .map_err(|_| anyhow!("sequencer stopped"))?;
            }
            Err(e) => println!("Error: {e}"),
        }
    }

    cancel.cancel();
    let _ = commands.send(RigCommand::Shutdown);
    worker
        .join()
        .map_err(|_| anyhow!("sequencer thread panicked"))?;
    printer
        .join()
        .map_err(|_| anyhow!("event printer panicked"))?;
    println!("Bye!");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  start               begin the session");
    println!("  capture             capture the current pose");
    println!("  auto [secs]         toggle timed auto-capture");
    println!("  next | prev         select the adjacent pose");
    println!("  jog <axis> fine <deg> | jog <axis> coarse <steps>");
    println!("  reset               abort and return to idle");
    println!("  quit                shut down");
}

fn parse_command(input: &str, default_interval: Duration) -> Result<RigCommand> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    match tokens.as_slice() {
        ["start"] => Ok(RigCommand::StartSession),
        ["capture"] | ["c"] => Ok(RigCommand::ManualCapture),
        ["auto"] => Ok(RigCommand::ToggleAutoCapture {
            interval: default_interval,
        }),
        ["auto", secs] => {
            let secs: u64 = secs.parse().context("auto interval must be seconds")?;
            Ok(RigCommand::ToggleAutoCapture {
                interval: Duration::from_secs(secs),
            })
        }
        ["next"] | ["n"] => Ok(RigCommand::NextPose),
        ["prev"] | ["p"] => Ok(RigCommand::PrevPose),
        ["jog", axis, "fine", value] => Ok(RigCommand::JogFine {
            axis: parse_axis(axis)?,
            delta_deg: value.parse().context("fine jog must be degrees")?,
        }),
        ["jog", axis, "coarse", value] => Ok(RigCommand::JogCoarse {
            axis: parse_axis(axis)?,
            delta_steps: value.parse().context("coarse jog must be signed steps")?,
        }),
        ["reset"] => Ok(RigCommand::Reset),
        _ => bail!("unrecognized command {input:?}"),
    }
}
