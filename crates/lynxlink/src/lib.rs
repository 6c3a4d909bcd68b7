use anyhow::{ensure, Result};
use typed_builder::TypedBuilder;

use lynxlink_core::{parity, LinkBus, NodeId, ParityMode, MAX_NODES};

/// Parameters for a scripted loopback session.
#[derive(TypedBuilder)]
pub struct SessionInfo {
    /// Units on the link.
    pub nodes: usize,
    #[builder(default = ParityMode::Odd)]
    pub parity: ParityMode,
}

/// Run an all-nodes loopback exchange on one in-process bus.
///
/// Every node announces itself in turn with a checksummed lobby-style
/// packet; all the others drain the line and verify what they heard.
/// Afterwards node 0 raises a break, which every node (the sender
/// included) must acknowledge exactly once.
pub fn run_loopback(info: SessionInfo) -> Result<()> {
    ensure!(
        (2..=MAX_NODES).contains(&info.nodes),
        "a loopback session needs 2..={MAX_NODES} nodes, got {}",
        info.nodes
    );

    let mut bus = LinkBus::new(info.nodes);
    bus.configure(info.parity);
    for node in 0..info.nodes {
        bus.port(node).enable_rx_irq(true);
    }

    for talker in 0..info.nodes {
        let packet = hello_packet(talker);
        for &byte in &packet {
            ensure!(
                bus.port(talker).send(byte),
                "node {talker}: transmit refused mid-packet"
            );
        }
        log::info!("node {talker}: announced itself ({} bytes)", packet.len());

        for listener in (0..info.nodes).filter(|&n| n != talker) {
            let mut port = bus.port(listener);
            ensure!(port.irq(), "node {listener}: no receive interrupt pending");

            let mut received = Vec::new();
            while port.rx_ready() {
                received.push(port.recv());
            }
            verify_packet(listener, &received)?;

            // Mark/space sessions legitimately latch parity errors on
            // payloads whose computed parity disagrees with the stuck
            // bit; surface them and move on.
            if port.has_any_error() {
                log::warn!(
                    "node {listener}: sticky errors after packet: {:?}",
                    port.errors()
                );
                port.reset_errors();
            }
        }

        ensure!(
            bus.port(talker).tx_empty(),
            "line did not drain after node {talker} spoke"
        );
    }

    bus.port(0).send_break();
    for node in 0..info.nodes {
        ensure!(bus.port(node).rx_break(), "node {node} missed the break");
    }
    log::info!("break acknowledged by all {} nodes", info.nodes);

    for node in 0..info.nodes {
        let status = bus.port(node).serctl();
        log::info!("node {node}: final SERCTL {:#010b}", status.bits());
    }
    Ok(())
}

/// Lobby-style announcement: a short body closed by the common
/// checksum.
fn hello_packet(node: NodeId) -> Vec<u8> {
    let mut packet = vec![0x05, node as u8, 0x00, 0x01];
    packet.push(parity::common_checksum(&packet));
    packet
}

fn verify_packet(listener: NodeId, packet: &[u8]) -> Result<()> {
    ensure!(
        packet.len() >= 2,
        "node {listener}: short packet ({} bytes)",
        packet.len()
    );
    let (body, check) = packet.split_at(packet.len() - 1);
    ensure!(
        check[0] == parity::common_checksum(body),
        "node {listener}: checksum mismatch on {body:02X?}"
    );
    log::debug!("node {listener}: packet verified ({} bytes)", packet.len());
    Ok(())
}
