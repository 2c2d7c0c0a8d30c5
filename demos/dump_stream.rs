//! Decode a captured motion stream.
//!
//! Usage: cargo run --example dump_stream -- <capture.bin> [--events]
//!
//! Without `--events` every record is printed as decoded. With it the
//! capture is replayed through a sensor core on an in-memory control
//! backend with every compass-free sensor enabled, and the resulting
//! events are printed instead.

use mplsensor::demux::RecordReader;
use mplsensor::{
    Backends, MemoryControl, MplConfig, MplSensor, ReaderSource, SensorEvent, SensorType,
};
use std::fs::File;
use std::io::Read;

fn dump_records(mut file: File) -> std::io::Result<()> {
    let mut reader = RecordReader::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        reader.feed(&buf[..n]);
        for r in reader.records() {
            println!(
                "ts={:<14} {:<18} step={} data={:?}",
                r.timestamp,
                format!("{:?}", r.kind),
                r.step as u8,
                r.data
            );
        }
    }
    println!(
        "\n{} records, {} bytes skipped, {} bytes trailing",
        reader.records_decoded(),
        reader.skipped_bytes(),
        reader.pending_bytes()
    );
    Ok(())
}

fn replay_events(file: File) -> mplsensor::Result<()> {
    let ctl = MemoryControl::new();
    ctl.set(mplsensor::Attribute::FirmwareLoaded, "1");
    let mut sensor = MplSensor::new(
        MplConfig::from_env(),
        Backends::new(ctl, ReaderSource::new(file)),
    )?;
    let caps = sensor.capabilities();
    for t in SensorType::ALL {
        if mplsensor::mask::check_supported(t, &caps).is_ok() {
            sensor.enable(t.handle(), true)?;
        }
    }

    let mut events = [SensorEvent::new(SensorType::Gyro, 0, [0.0; 6], 0); 32];
    let mut total = 0u64;
    loop {
        let n = sensor.read_events(&mut events)?;
        if n == 0 && sensor.source_exhausted() && !sensor.has_pending_events() {
            break;
        }
        for e in &events[..n] {
            total += 1;
            println!(
                "ts={:<14} {:<20} acc={} [{:+.4}, {:+.4}, {:+.4}, {:+.4}]",
                e.timestamp,
                e.sensor.name(),
                e.accuracy,
                e.values[0],
                e.values[1],
                e.values[2],
                e.values[3],
            );
        }
    }
    println!("\n{} events, {} steps", total, sensor.steps_detected());
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let path = match args.iter().find(|a| !a.starts_with("--")) {
        Some(p) => p.clone(),
        None => {
            eprintln!("Usage: dump_stream <capture.bin> [--events]");
            std::process::exit(2);
        }
    };
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to open {}: {}", path, e);
            std::process::exit(1);
        }
    };

    let result = if args.iter().any(|a| a == "--events") {
        replay_events(file)
    } else {
        dump_records(file).map_err(mplsensor::MplError::from)
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
