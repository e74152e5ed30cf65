//! Process lifecycle: signal handling and coordinated shutdown.

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::wait_for_signal;
