pub mod cancellation;
pub mod dedupe_config;
pub mod env;
pub mod input;
pub mod logging;
pub mod progress_config;

pub fn get_memory_usage() -> u64 {
    use sysinfo::System;
    let mut sys = System::new_all();
    sys.refresh_memory();
    sys.used_memory() / (1024 * 1024) // Convert to MB
}
