//! List all connected Tracker DK devices.

fn main() {
    env_logger::init();

    match trackerdk::list_devices() {
        Ok(devices) => {
            println!("Found {} tracker(s):", devices.len());
            for (i, dev) in devices.iter().enumerate() {
                println!(
                    "  [{}] {:04x}:{:04x}  Bus={} Addr={}",
                    i, dev.vendor_id, dev.product_id, dev.bus_id, dev.device_address
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
