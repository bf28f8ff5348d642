//! Connectivity monitoring.

mod monitor;
mod signal;

pub use monitor::{
  ConnectionQuality, LinkHints, LinkSignal, NetworkEvent, NetworkStatus, NetworkStatusMonitor,
};
pub use signal::{HttpProbe, ManualSignal, ManualSignalHandle, NetworkSignalSource};
