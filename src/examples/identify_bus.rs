// examples/identify_bus.rs

use gce_disk_name::{physical_drive_paths, DeviceHandle, PropertyChannel};

fn main() {
    println!("--- Disk Bus Type Identifier ---");
    println!("NOTE: This requires administrator privileges to run.\n");

    for path in physical_drive_paths() {
        print!("Device: {} -> ", path);

        let mut channel = match DeviceHandle::open(&path) {
            Ok(handle) => PropertyChannel::new(handle),
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match channel.device_descriptor() {
            Ok(descriptor) => println!(
                "Bus Type: {:?}, Vendor: {}, Product: {}",
                descriptor.bus_type,
                descriptor.vendor_id.as_deref().unwrap_or("N/A"),
                descriptor.product_id.as_deref().unwrap_or("N/A"),
            ),
            Err(e) => println!("Error querying bus type: {}", e),
        }
    }
}
