//! Print detailed info about the first connected tracker.
//!
//! When the USB interface cannot be claimed (the kernel HID driver owns it),
//! the feature reports are read through hidapi instead.

use trackerdk::hid::{FeatureReports, HidapiFeatureReports};

fn main() {
    env_logger::init();

    let device = match trackerdk::Device::open_first() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("USB bring-up failed: {}", e);
            if let Err(e) = print_hidapi_info() {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
            return;
        }
    };

    let desc = device.descriptor();
    println!("Bus:          {}", device.bus_id());
    println!("Manufacturer: {}", desc.manufacturer);
    println!("Product:      {}", desc.product);
    println!("Serial:       {}", desc.serial_number);
    println!("USB version:  {}", desc.usb_version);
    println!("Release:      {}", desc.device_release);
    println!(
        "Interface {} endpoint {:#04x}, {} byte reports",
        device.interface_number(),
        device.endpoint_address(),
        device.report_length()
    );

    for (i, report) in device.report_descriptor().reports.iter().enumerate() {
        println!(
            "  report[{}] id={} inputs={} outputs={} features={} size={}",
            i,
            report.report_id,
            report.inputs.len(),
            report.outputs.len(),
            report.features.len(),
            report.total_size
        );
    }

    match device.hmd_info() {
        Some(info) => {
            println!(
                "Display:      {}x{}  screen {:.4}x{:.4} m  lens separation {:.4} m",
                info.resolution_horizontal,
                info.resolution_vertical,
                info.screen_size_horizontal,
                info.screen_size_vertical,
                info.lens_separation
            );
            println!("Distortion:   {:?}", info.distortion_k);
        }
        None => println!("Display:      (not reported)"),
    }
    match device.sensor_range() {
        Some(range) => println!(
            "Range:        accel {} g  gyro {}  mag {}",
            range.accel_scale, range.gyro_scale, range.mag_scale
        ),
        None => println!("Range:        (not reported)"),
    }
    if let Some(config) = device.sensor_config() {
        println!("Config:       {:?}", config);
    }
}

fn print_hidapi_info() -> trackerdk::Result<()> {
    let reports = HidapiFeatureReports::open_first()?;
    println!("Reading feature reports through hidapi");
    println!("Display:      {:?}", reports.read_hmd_info()?);
    println!("Range:        {:?}", reports.read_sensor_range()?);
    println!("Config:       {:?}", reports.read_sensor_config()?);
    Ok(())
}
