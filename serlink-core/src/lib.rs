pub mod buffer;
pub mod config;
pub mod error;
pub mod foreground;
pub mod link;
pub mod open;
pub mod transport;

pub use buffer::ReceiveBuffer;
pub use config::{AUTO_DEVICE, Device, Handshake, LinkConfig, Probe, SerialSettings};
pub use error::{LinkError, Result};
pub use foreground::{Foreground, ForegroundHandle, ForegroundQueue};
pub use link::{Line, LinkState, SerialLink, WriteStatus};
pub use open::open_device;
