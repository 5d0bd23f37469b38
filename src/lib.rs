use std::time::Duration;

pub mod clock;
pub mod log;
pub mod message;
pub mod mutex;
pub mod peer;
pub mod printer;

/// Deadline for a single coordination call to another peer. A peer that does
/// not answer within it is treated as crashed for the current cycle.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a print call. Covers the printer's simulated delay.
pub const PRINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounds of the pause between two print cycles, in seconds.
pub const WORK_PAUSE_SECS: (f64, f64) = (2.0, 8.0);

/// Bounds of the printer's simulated printing delay, in seconds.
pub const PRINT_DELAY_SECS: (f64, f64) = (2.0, 3.0);
