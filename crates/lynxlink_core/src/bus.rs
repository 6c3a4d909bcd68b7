//! The shared link bus.
//!
//! The real cable is a single open-collector wire: every byte any unit
//! transmits is seen by all units, sender included, and each unit's
//! UART picks it up independently. We model that as one FIFO of
//! in-flight messages with a per-message read receipt, plus per-node
//! status mirroring what games observe through the serial control
//! register (SERCTL) of the Mikey UART.

use std::collections::VecDeque;
use std::time::Instant;

use bitflags::bitflags;

use crate::parity;
use crate::{BUFFER_LIMIT, MAX_NODES};

/// Identity of one unit on the link, `0..node_count`.
pub type NodeId = usize;

/// Per-message bitmask of the nodes that have consumed it.
pub type ReadMask = u32;

/// Bus-wide parity policy, established once before any traffic flows.
///
/// `Odd` and `Even` compute a real parity bit per byte. `Space` and
/// `Mark` disable computation and transmit a stuck 0 or 1 instead.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParityMode {
    Odd,
    Even,
    Space,
    Mark,
}

impl ParityMode {
    /// Whether the parity bit is computed from the payload.
    #[inline]
    pub const fn parity_enabled(self) -> bool {
        matches!(self, ParityMode::Odd | ParityMode::Even)
    }

    /// Polarity bit: even parity when computing, the stuck mark bit
    /// otherwise.
    #[inline]
    pub const fn even_polarity(self) -> bool {
        matches!(self, ParityMode::Even | ParityMode::Mark)
    }
}

/// Reason a transmit is refused.
///
/// `Frame` is carried for SERCTL compatibility: the rejection path
/// knows how to latch it, but no condition in the modeled hardware
/// produces it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxFault {
    Overrun,
    Frame,
}

/// Sticky per-node error flags.
///
/// Latched by the bus as a side effect of transmits and readiness
/// polls; nothing clears them except [`LinkBus::reset_errors`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ErrorFlags {
    pub overrun: bool,
    pub parity: bool,
    pub frame: bool,
}

impl ErrorFlags {
    #[inline]
    pub fn any(self) -> bool {
        self.overrun || self.parity || self.frame
    }

    fn clear(&mut self) {
        *self = ErrorFlags::default();
    }
}

bitflags! {
    /// SERCTL status byte as games read it.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Serctl: u8 {
        const TX_READY = 0x80;
        const RX_READY = 0x40;
        const TX_EMPTY = 0x20;
        const PARITY_ERROR = 0x10;
        const OVERRUN_ERROR = 0x08;
        const FRAME_ERROR = 0x04;
        const RX_BREAK = 0x02;
        /// Parity bit of the next unread byte for the node.
        const PARITY_BIT = 0x01;
    }
}

/// Parity settings, immutable once [`LinkBus::configure`] has run.
#[derive(Clone, Copy)]
struct ParityConfig {
    enabled: bool,
    even: bool,
}

impl ParityConfig {
    /// Parity bit that accompanies `payload` on the wire: computed
    /// when parity is enabled, the stuck polarity bit otherwise.
    fn expected_parity(self, payload: u8) -> bool {
        if self.enabled {
            parity::parity_bit(self.even, payload)
        } else {
            self.even
        }
    }
}

/// One byte in flight on the line.
struct Message {
    sender: NodeId,
    payload: u8,
    /// Parity bit recorded at transmit time under the configured mode.
    parity: bool,
    /// Wall-clock transmit time; informational only, never used for
    /// ordering or delivery.
    sent_at: Instant,
    /// One bit per node that has consumed this byte, monotonically
    /// growing. The sender's own bit starts set.
    read_mask: ReadMask,
}

impl Message {
    fn new(sender: NodeId, payload: u8, parity: bool) -> Self {
        let mut msg = Self {
            sender,
            payload,
            parity,
            sent_at: Instant::now(),
            read_mask: 0,
        };
        msg.mark_read(sender);
        msg
    }

    #[inline]
    fn has_read(&self, node: NodeId) -> bool {
        self.read_mask & (1 << node) != 0
    }

    #[inline]
    fn mark_read(&mut self, node: NodeId) {
        self.read_mask |= 1 << node;
    }
}

/// Mutable status of one node on the link.
#[derive(Default)]
struct NodeState {
    errors: ErrorFlags,
    break_pending: bool,
    rx_irq_enabled: bool,
    tx_irq_enabled: bool,
}

/// The shared bus: one message buffer plus the status of every node.
///
/// All state lives here. A single logical caller (the host emulator's
/// polling loop) is expected to drive it serially; there is no internal
/// locking and no operation blocks.
pub struct LinkBus {
    /// Per-node status, indexed by [`NodeId`].
    nodes: Vec<NodeState>,
    /// Read-receipt value meaning "every node has seen it".
    all_read: ReadMask,
    /// Set exactly once by `configure`; every operation insists on it.
    config: Option<ParityConfig>,
    /// In-flight bytes, oldest first. Shared by all nodes; ordering
    /// across senders is global transmit order.
    buffer: VecDeque<Message>,
}

impl LinkBus {
    /// Create a bus for `node_count` units.
    ///
    /// Panics when the count does not fit the read-receipt mask
    /// (`1..=MAX_NODES`).
    pub fn new(node_count: usize) -> Self {
        assert!(
            (1..=MAX_NODES).contains(&node_count),
            "node count {node_count} outside supported range 1..={MAX_NODES}"
        );
        Self {
            nodes: (0..node_count).map(|_| NodeState::default()).collect(),
            all_read: ReadMask::MAX >> (MAX_NODES - node_count),
            config: None,
            buffer: VecDeque::new(),
        }
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Establish the parity policy from a named mode.
    pub fn configure(&mut self, mode: ParityMode) {
        self.configure_parity(mode.parity_enabled(), mode.even_polarity());
    }

    /// Establish the parity policy from raw register bits. Must run
    /// exactly once, before any other operation.
    pub fn configure_parity(&mut self, enabled: bool, even: bool) {
        assert!(self.config.is_none(), "link parity configured twice");
        log::debug!("link configured: parity enabled={enabled} even={even}");
        self.config = Some(ParityConfig { enabled, even });
    }

    /// Per-node handle bound to `node`.
    pub fn port(&mut self, node: NodeId) -> crate::LinkPort<'_> {
        self.check_node(node);
        crate::LinkPort::new(self, node)
    }

    /// Transmit one byte from `node` onto the line.
    ///
    /// Returns false and latches the matching error flag on the sender
    /// when the line refuses the byte; with the current model that is
    /// only a full buffer. The sender's own read-receipt bit starts
    /// set, so a unit never receives its own transmission.
    pub fn send(&mut self, node: NodeId, payload: u8) -> bool {
        let cfg = self.config();
        self.check_node(node);
        if let Err(fault) = self.tx_check() {
            match fault {
                TxFault::Overrun => self.nodes[node].errors.overrun = true,
                TxFault::Frame => self.nodes[node].errors.frame = true,
            }
            log::debug!(
                "node {node}: tx of 0x{payload:02X} refused ({fault:?}), {} in flight, oldest sent {:?} ago",
                self.buffer.len(),
                self.buffer.front().map(|msg| msg.sent_at.elapsed()).unwrap_or_default()
            );
            return false;
        }
        self.buffer
            .push_back(Message::new(node, payload, cfg.expected_parity(payload)));
        true
    }

    /// Consume the next unread byte for `node`.
    ///
    /// The caller must have seen [`rx_ready`](Self::rx_ready) answer
    /// true; receiving with nothing pending is a caller bug and
    /// panics. Once the receipt is recorded, fully-read messages are
    /// evicted from the buffer front, in buffer order only.
    pub fn recv(&mut self, node: NodeId) -> u8 {
        self.assert_configured();
        self.check_node(node);
        let idx = self
            .first_unread(node)
            .expect("recv with no unread byte pending");
        let msg = &mut self.buffer[idx];
        msg.mark_read(node);
        let payload = msg.payload;
        self.evict_fully_read();
        payload
    }

    /// Whether an unread byte is waiting for `node`.
    ///
    /// Polling readiness is also where parity checking happens: the
    /// parity recorded at transmit time is compared against the parity
    /// of the payload under the current polarity, and a mismatch
    /// latches the node's sticky parity error. `recv` itself never
    /// re-runs the check, so a caller that skips the poll skips the
    /// error too.
    pub fn rx_ready(&mut self, node: NodeId) -> bool {
        let cfg = self.config();
        self.check_node(node);
        let Some(idx) = self.first_unread(node) else {
            return false;
        };
        let msg = &self.buffer[idx];
        // The check recomputes from the polarity bit alone, even in the
        // stuck-bit modes: a mark/space line flags any payload whose
        // computed parity disagrees with the stuck level.
        if msg.parity != parity::parity_bit(cfg.even, msg.payload) {
            let payload = msg.payload;
            let sender = msg.sender;
            let errors = &mut self.nodes[node].errors;
            if !errors.parity {
                log::debug!(
                    "node {node}: parity error latched on byte 0x{payload:02X} from node {sender}"
                );
            }
            errors.parity = true;
        }
        true
    }

    /// Whether `node` may transmit right now.
    ///
    /// Refused only when the shared buffer is at capacity. The
    /// [`TxFault::Frame`] variant never comes out of this path.
    pub fn tx_ready(&self, node: NodeId) -> Result<(), TxFault> {
        self.assert_configured();
        self.check_node(node);
        self.tx_check()
    }

    /// True when none of `node`'s own bytes are still in flight.
    pub fn tx_empty(&self, node: NodeId) -> bool {
        self.assert_configured();
        self.check_node(node);
        self.buffer.iter().all(|msg| msg.sender != node)
    }

    /// Raise a break condition on the line.
    ///
    /// Every node observes it, including the unit that raised it; on
    /// the shared wire the sender hears its own break.
    pub fn send_break(&mut self) {
        self.assert_configured();
        log::debug!("break raised on the line");
        for state in &mut self.nodes {
            state.break_pending = true;
        }
    }

    /// One-shot poll of `node`'s pending break: reports and clears it,
    /// so the next poll answers false until another break is raised.
    pub fn rx_break(&mut self, node: NodeId) -> bool {
        self.assert_configured();
        self.check_node(node);
        std::mem::take(&mut self.nodes[node].break_pending)
    }

    /// Interrupt line for `node`.
    ///
    /// Asserted when receive data is pending with rx interrupts
    /// enabled, or the line can accept a byte with tx interrupts
    /// enabled. The receive poll runs first, so its parity side effect
    /// fires here too. Because transmit readiness only fails on a
    /// saturated buffer, a node with tx interrupts enabled is asserted
    /// nearly all the time.
    pub fn irq(&mut self, node: NodeId) -> bool {
        self.assert_configured();
        self.check_node(node);
        let rx_enabled = self.nodes[node].rx_irq_enabled;
        if rx_enabled && self.rx_ready(node) {
            return true;
        }
        self.nodes[node].tx_irq_enabled && self.tx_check().is_ok()
    }

    pub fn enable_rx_irq(&mut self, node: NodeId, enabled: bool) {
        self.assert_configured();
        self.nodes[node].rx_irq_enabled = enabled;
    }

    pub fn enable_tx_irq(&mut self, node: NodeId, enabled: bool) {
        self.assert_configured();
        self.nodes[node].tx_irq_enabled = enabled;
    }

    /// Current sticky error flags for `node`.
    pub fn errors(&self, node: NodeId) -> ErrorFlags {
        self.assert_configured();
        self.nodes[node].errors
    }

    #[inline]
    pub fn has_parity_error(&self, node: NodeId) -> bool {
        self.errors(node).parity
    }

    #[inline]
    pub fn has_overrun_error(&self, node: NodeId) -> bool {
        self.errors(node).overrun
    }

    #[inline]
    pub fn has_frame_error(&self, node: NodeId) -> bool {
        self.errors(node).frame
    }

    #[inline]
    pub fn has_any_error(&self, node: NodeId) -> bool {
        self.errors(node).any()
    }

    /// Clear all three error flags for `node`. Nothing else does.
    pub fn reset_errors(&mut self, node: NodeId) {
        self.assert_configured();
        self.nodes[node].errors.clear();
    }

    /// Snapshot of the node's SERCTL status byte.
    ///
    /// Mirrors the hardware register read: computing it polls receive
    /// readiness, so a parity error latched by the poll shows up in
    /// the same snapshot. The break bit reports the pending flag
    /// without consuming it; only [`rx_break`](Self::rx_break) clears
    /// it. Bit 0 carries the parity bit of the next unread byte for
    /// the node, 0 when nothing is pending.
    pub fn serctl(&mut self, node: NodeId) -> Serctl {
        let cfg = self.config();
        self.check_node(node);

        let mut status = Serctl::empty();
        status.set(Serctl::TX_READY, self.tx_check().is_ok());
        status.set(Serctl::RX_READY, self.rx_ready(node));
        status.set(Serctl::TX_EMPTY, self.tx_empty(node));

        let errors = self.nodes[node].errors;
        status.set(Serctl::PARITY_ERROR, errors.parity);
        status.set(Serctl::OVERRUN_ERROR, errors.overrun);
        status.set(Serctl::FRAME_ERROR, errors.frame);
        status.set(Serctl::RX_BREAK, self.nodes[node].break_pending);
        status.set(Serctl::PARITY_BIT, self.next_parity_bit(node, cfg));
        status
    }

    fn config(&self) -> ParityConfig {
        self.config.expect("link bus used before configure")
    }

    #[inline]
    fn assert_configured(&self) {
        assert!(self.config.is_some(), "link bus used before configure");
    }

    fn check_node(&self, node: NodeId) {
        assert!(
            node < self.nodes.len(),
            "node id {node} out of range for {}-node link",
            self.nodes.len()
        );
    }

    /// Index of the first message in buffer order `node` has not read.
    fn first_unread(&self, node: NodeId) -> Option<usize> {
        self.buffer.iter().position(|msg| !msg.has_read(node))
    }

    fn tx_check(&self) -> Result<(), TxFault> {
        if self.buffer.len() >= BUFFER_LIMIT {
            return Err(TxFault::Overrun);
        }
        Ok(())
    }

    /// Drop fully-read messages from the buffer front. Eviction never
    /// reorders: a fully-read message behind an unread one stays until
    /// everything ahead of it is gone.
    fn evict_fully_read(&mut self) {
        while let Some(front) = self.buffer.front() {
            if front.read_mask != self.all_read {
                break;
            }
            self.buffer.pop_front();
        }
    }

    /// Expected parity of the next unread byte for `node`, 0 with
    /// nothing pending. Peeks without consuming.
    fn next_parity_bit(&self, node: NodeId, cfg: ParityConfig) -> bool {
        self.first_unread(node)
            .map(|idx| cfg.expected_parity(self.buffer[idx].payload))
            .unwrap_or(false)
    }
}
