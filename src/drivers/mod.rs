//! Hardware initialisation, raw GPIO access, and the task watchdog.

pub mod hw_init;
pub mod watchdog;
