//! Gratuitous ARP announcements
//!
//! A gratuitous ARP is a broadcast request in which the sender and target
//! protocol addresses are both the address being claimed. Neighbors that
//! already cache the address update their entry; everyone else learns it.

use crate::error::{Error, Result};
use pnet::datalink::{self, Channel, Config, DataLinkSender, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

/// Ethernet header length
pub const ETH_HDR_LEN: usize = 14;
/// ARP payload length for Ethernet/IPv4
pub const ARP_LEN: usize = 28;
/// Minimum Ethernet frame length without the frame check sequence
pub const MIN_ETH_FRAME_NO_FCS: usize = 60;

/// Build a gratuitous ARP request claiming `address` for `src_mac`
pub fn gratuitous_frame(src_mac: MacAddr, address: Ipv4Addr) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; MIN_ETH_FRAME_NO_FCS];

    {
        let mut ethernet = MutableEthernetPacket::new(&mut buffer[..ETH_HDR_LEN + ARP_LEN])
            .ok_or_else(|| Error::Packet("ethernet buffer too small".into()))?;
        ethernet.set_destination(MacAddr::broadcast());
        ethernet.set_source(src_mac);
        ethernet.set_ethertype(EtherTypes::Arp);
    }

    let mut arp = MutableArpPacket::new(&mut buffer[ETH_HDR_LEN..ETH_HDR_LEN + ARP_LEN])
        .ok_or_else(|| Error::Packet("ARP buffer too small".into()))?;
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(src_mac);
    arp.set_sender_proto_addr(address);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_target_proto_addr(address);

    Ok(buffer)
}

/// Open a raw Ethernet sender on a named interface
pub(crate) fn open_sender(interface: &str) -> Result<(NetworkInterface, Box<dyn DataLinkSender>)> {
    let intf = datalink::interfaces()
        .into_iter()
        .find(|i| i.name == interface)
        .ok_or_else(|| Error::NoInterfaceFound {
            tried: vec![interface.to_string()],
        })?;

    match datalink::channel(&intf, Config::default())? {
        Channel::Ethernet(tx, _rx) => Ok((intf, tx)),
        _ => Err(Error::InterfaceUnusable {
            interface: interface.to_string(),
            reason: "not an Ethernet channel".into(),
        }),
    }
}

/// Send one frame, surfacing the I/O result
pub(crate) fn send_frame(tx: &mut dyn DataLinkSender, frame: &[u8]) -> Result<()> {
    match tx.send_to(frame, None) {
        Some(result) => Ok(result?),
        None => Err(Error::Packet("datalink sender has no room for the frame".into())),
    }
}
