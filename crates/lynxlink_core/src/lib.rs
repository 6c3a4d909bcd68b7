//! Model of the Lynx's ComLynx link port as one shared, multi-drop
//! serial bus.
//!
//! Every byte a node transmits is placed on a single shared line and
//! must be read independently by every other node. [`LinkBus`] owns all
//! of the state (message buffer, per-node errors, break and interrupt
//! flags); [`LinkPort`] is a disposable per-node handle for callers
//! that think in terms of "their" port, such as the UART register layer
//! of a host emulator.

pub mod bus;
pub mod parity;
mod port;

pub use bus::{ErrorFlags, LinkBus, NodeId, ParityMode, ReadMask, Serctl, TxFault};
pub use port::LinkPort;

/// Most nodes a single link supports, bounded by the width of the
/// per-message read-receipt mask.
pub const MAX_NODES: usize = ReadMask::BITS as usize;

/// Unevicted messages the shared buffer holds before further transmits
/// are refused with an overrun.
pub const BUFFER_LIMIT: usize = 32;
