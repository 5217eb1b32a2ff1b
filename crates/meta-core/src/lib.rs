//! Meta-Core: MediaTek bootloader meta-mode client in Rust.
//!
//! This crate talks to a MediaTek device sitting in its preloader over a
//! serial line: it enters meta mode, issues single-byte opcode queries and
//! writes NVRAM records such as the IMEI.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: byte channel abstraction (serialport, mock)
//! - **Protocol**: opcodes, response shapes and wire constants
//! - **Handshake**: READY / mode / ack sequence producing a [`Session`]
//! - **Command**: opcode request/response over an established session
//! - **Decode**: chipset table, health and life time decoding
//! - **BCD**: IMEI packed-BCD codec
//! - **NVRAM**: record writes and IMEI repair
//! - **Report**: device information assembly
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use meta_core::{SerialChannel, SessionConfig, TracingObserver};
//!
//! let config = SessionConfig {
//!     port: Some("/dev/ttyACM0".to_string()),
//!     ..Default::default()
//! };
//!
//! let channel = SerialChannel::open("/dev/ttyACM0", config.baud_rate)?;
//! let mut session = config.connect(channel, Arc::new(TracingObserver))?;
//! println!("{}", session.read_chipset()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bcd;
pub mod command;
pub mod decode;
pub mod events;
pub mod handshake;
pub mod nvram;
pub mod protocol;
pub mod report;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use bcd::{BcdPayload, CodecError, ImeiRecord};
pub use command::ProtocolError;
pub use decode::{DeviceFact, HealthStatus, LifeTime, chipset_name};
pub use events::{
    ChannelObserver, MetaEvent, MetaObserver, NullObserver, PacketDirection, Severity,
    TracingObserver,
};
pub use handshake::{HandshakeConfig, HandshakeError, HandshakeState, MetaHandshake};
pub use nvram::{ImeiRepair, NvramError, NvramPacket, RepairReport, repair_imei};
pub use protocol::Opcode;
pub use report::{
    DeviceReport, KnownStorage, StorageHealth, StorageInfoSource, UnverifiedStorage,
    read_device_report,
};
pub use session::{Session, SessionConfig, Timeouts};
pub use transport::{ByteChannel, MockChannel, SerialChannel, TransportError, list_ports};
