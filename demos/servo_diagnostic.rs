// Servo diagnostic: READ-ONLY check of every swerve module servo
//
// This tool does NOT write anything to the servos - it's completely safe.
// Run it first to confirm wiring, IDs and steering zero offsets.
//
// Usage: cargo run --example servo_diagnostic -- [port] [config.json]
// Example: cargo run --example servo_diagnostic -- /dev/ttyACM0

use std::f64::consts::TAU;
use std::io::{self, Write};

use swerve_zenoh_runtime::config::{DriveConfig, SERVO_PORT};
use swerve_zenoh_runtime::motor::feetech::{FeetechBus, Register, STEPS_PER_REVOLUTION};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| SERVO_PORT.to_string());
    let config = match args.next() {
        Some(path) => DriveConfig::load(path)?,
        None => DriveConfig::feetech(),
    };

    println!("Swerve servo diagnostic (READ-ONLY)");
    println!("Serial port: {}", port);
    println!();

    println!("Step 1: Opening serial port...");
    let mut bus = match FeetechBus::open(&port) {
        Ok(bus) => {
            println!("  ✓ Serial port opened successfully");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!("  - Check the port path and that the USB cable is connected");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Pinging servos...");
    let mut all_found = true;
    for module in &config.modules {
        for (role, id) in [("drive", module.drive_id), ("turn", module.turn_id)] {
            print!("  {} {} (ID {}): ", module.name, role, id);
            io::stdout().flush()?;
            match bus.ping(id) {
                Ok(true) => println!("✓ RESPONDING"),
                Ok(false) => {
                    println!("✗ NO RESPONSE");
                    all_found = false;
                }
                Err(e) => {
                    println!("✗ ERROR: {}", e);
                    all_found = false;
                }
            }
        }
    }
    println!();
    if !all_found {
        println!("⚠ WARNING: Not all servos responded! Check power, IDs and wiring.");
        println!();
    }

    println!("Step 3: Reading servo status...");
    println!();
    for module in &config.modules {
        println!("  === {} ===", module.name);

        match bus.read_u8(module.turn_id, Register::OperatingMode) {
            Ok(mode) => {
                let mode_str = match mode {
                    0 => "Position",
                    1 => "Velocity",
                    2 => "PWM",
                    3 => "Step",
                    _ => "Unknown",
                };
                println!("    Turn mode:      {} ({})", mode, mode_str);
            }
            Err(e) => println!("    Turn mode:      ERROR - {}", e),
        }

        match bus.read_status(module.turn_id) {
            Ok(status) => {
                let raw = status.position as f64 / STEPS_PER_REVOLUTION * TAU;
                let angle = raw - module.turn_zero_offset;
                println!(
                    "    Turn encoder:   {} ({:.1}° raw, {:.1}° after zero offset)",
                    status.position,
                    raw.to_degrees(),
                    angle.to_degrees()
                );
                println!("    Turn supply:    {:.1} V", status.supply_volts());
            }
            Err(e) => println!("    Turn status:    ERROR - {}", e),
        }

        match bus.read_status(module.drive_id) {
            Ok(status) => {
                println!("    Drive encoder:  {}", status.position);
                println!("    Drive velocity: {} steps/s", status.velocity);
                println!(
                    "    Drive load:     {:.1}%, current {:.3} A",
                    status.load_fraction() * 100.0,
                    status.current_amps()
                );
            }
            Err(e) => println!("    Drive status:   ERROR - {}", e),
        }
        println!();
    }

    println!("Diagnostic complete.");
    println!("With all wheels pointing forward, the turn angle after zero offset should read ~0°.");

    Ok(())
}
