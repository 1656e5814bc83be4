//! Stream fused orientation as JSON lines.
//!
//! One object per line:
//!
//! {"qx":0.001,"qy":0.120,"qz":-0.003,"qw":0.993,"roll":0.2,"pitch":-0.3,"yaw":13.8,"t":12.3456}
//!
//! Usage: cargo run --release --example stream_json

use std::io::{self, Write};
use std::time::Duration;

fn main() {
    env_logger::init();

    let device = match trackerdk::Device::open_first() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("Bus:     {}", device.bus_id());
    eprintln!("Serial:  {}", device.descriptor().serial_number);

    let stream = match device.start_tracking(trackerdk::TrackerConfig::from_env()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start tracking: {}", e);
            std::process::exit(1);
        }
    };

    eprintln!("Streaming JSON (Ctrl+C to stop)...");

    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let mut idle_timeouts: u32 = 0;

    loop {
        match stream.recv_timeout(Duration::from_secs(2)) {
            Ok(sample) => {
                idle_timeouts = 0;
                let q = &sample.orientation;
                let _ = writeln!(
                    out,
                    "{{\"qx\":{:.4},\"qy\":{:.4},\"qz\":{:.4},\"qw\":{:.4},\"roll\":{:.1},\"pitch\":{:.1},\"yaw\":{:.1},\"t\":{:.4}}}",
                    q.i,
                    q.j,
                    q.k,
                    q.w,
                    sample.euler_deg[0],
                    sample.euler_deg[1],
                    sample.euler_deg[2],
                    sample.host_timestamp_s,
                );
                let _ = out.flush();
            }
            Err(trackerdk::TrackerError::Timeout) => {
                idle_timeouts += 1;
                eprintln!("No telemetry for 2s (timeout #{})", idle_timeouts);
                if idle_timeouts >= 15 {
                    eprintln!("Stopping after 30s without telemetry");
                    break;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }
}
