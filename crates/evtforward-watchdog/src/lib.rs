mod heart;
mod watchdog;

pub use heart::Heart;
pub use watchdog::{Watchdog, WatchdogHandle};
