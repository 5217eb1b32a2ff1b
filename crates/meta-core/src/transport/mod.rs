//! Transport layer module.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::MockChannel;
pub use serial::{DEFAULT_BAUD_RATE, SerialChannel, list_ports};
pub use traits::{ByteChannel, TransportError};
