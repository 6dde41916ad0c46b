//! Background relays running alongside a blocking evaluation.

pub mod interrupt;
pub mod output;

pub use interrupt::{block_interrupt_signal, InterruptRelay, InterruptSource, SignalSource};
pub use output::{OutputRelay, RelayConfig};
