use crate::bus::{ErrorFlags, LinkBus, NodeId, ParityMode, Serctl, TxFault};

/// Per-node handle onto a shared [`LinkBus`].
///
/// This is what the register-access layer of a host emulator holds
/// while servicing one unit: every operation forwards to the bus with
/// the bound identity. The handle carries no state of its own, so it
/// can be created and dropped freely; handles bound to the same
/// identity all observe the same bus state.
pub struct LinkPort<'a> {
    bus: &'a mut LinkBus,
    node: NodeId,
}

impl<'a> LinkPort<'a> {
    pub(crate) fn new(bus: &'a mut LinkBus, node: NodeId) -> Self {
        Self { bus, node }
    }

    /// The bound node identity.
    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Configuration is bus-wide; forwarding it here lets the register
    /// layer of any one unit establish the policy for the whole line.
    pub fn configure(&mut self, mode: ParityMode) {
        self.bus.configure(mode);
    }

    pub fn configure_parity(&mut self, enabled: bool, even: bool) {
        self.bus.configure_parity(enabled, even);
    }

    pub fn send(&mut self, payload: u8) -> bool {
        self.bus.send(self.node, payload)
    }

    pub fn recv(&mut self) -> u8 {
        self.bus.recv(self.node)
    }

    pub fn rx_ready(&mut self) -> bool {
        self.bus.rx_ready(self.node)
    }

    pub fn tx_ready(&self) -> Result<(), TxFault> {
        self.bus.tx_ready(self.node)
    }

    pub fn tx_empty(&self) -> bool {
        self.bus.tx_empty(self.node)
    }

    pub fn send_break(&mut self) {
        self.bus.send_break();
    }

    pub fn rx_break(&mut self) -> bool {
        self.bus.rx_break(self.node)
    }

    pub fn irq(&mut self) -> bool {
        self.bus.irq(self.node)
    }

    pub fn enable_rx_irq(&mut self, enabled: bool) {
        self.bus.enable_rx_irq(self.node, enabled);
    }

    pub fn enable_tx_irq(&mut self, enabled: bool) {
        self.bus.enable_tx_irq(self.node, enabled);
    }

    pub fn errors(&self) -> ErrorFlags {
        self.bus.errors(self.node)
    }

    pub fn has_parity_error(&self) -> bool {
        self.bus.has_parity_error(self.node)
    }

    pub fn has_overrun_error(&self) -> bool {
        self.bus.has_overrun_error(self.node)
    }

    pub fn has_frame_error(&self) -> bool {
        self.bus.has_frame_error(self.node)
    }

    pub fn has_any_error(&self) -> bool {
        self.bus.has_any_error(self.node)
    }

    pub fn reset_errors(&mut self) {
        self.bus.reset_errors(self.node);
    }

    pub fn serctl(&mut self) -> Serctl {
        self.bus.serctl(self.node)
    }
}
