//! Stream fused orientation from the tracker to stdout.
//!
//! Usage: cargo run --example stream
//! Press Ctrl+C to stop.

use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let device = match trackerdk::Device::open_first() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    println!("Bus:     {}", device.bus_id());
    println!("Product: {}", device.descriptor().product);
    println!("Serial:  {}", device.descriptor().serial_number);
    println!();

    let stream = match device.start_tracking(trackerdk::TrackerConfig::from_env()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start tracking: {}", e);
            std::process::exit(1);
        }
    };

    println!("Streaming orientation (Ctrl+C to stop)...");

    let start = Instant::now();
    let mut count: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        match stream.recv_timeout(Duration::from_secs(2)) {
            Ok(sample) => {
                count += 1;
                let q = &sample.orientation;
                let e = &sample.euler_deg;

                // Print every ~100th sample to avoid flooding the terminal
                if count % 100 == 1 {
                    println!(
                        "stage={:<10}  quat=[{:+.3}, {:+.3}, {:+.3}, {:+.3}]  rpy=[{:+7.2}, {:+7.2}, {:+7.2}]  temp={:.1}",
                        sample.stage,
                        q.i, q.j, q.k, q.w,
                        e[0], e[1], e[2],
                        sample.sample.temperature,
                    );
                }

                // Report rate every 3 seconds
                let now = Instant::now();
                if now.duration_since(last_report) >= Duration::from_secs(3) {
                    let elapsed = start.elapsed().as_secs_f64();
                    let hz = count as f64 / elapsed;
                    println!("--- {} samples in {:.1}s ({:.1} Hz) ---", count, elapsed, hz);
                    last_report = now;
                }
            }
            Err(trackerdk::TrackerError::Timeout) => {
                eprintln!("Timeout waiting for telemetry");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "\nTotal: {} samples in {:.1}s ({:.1} Hz)",
        count,
        elapsed,
        count as f64 / elapsed
    );
}
