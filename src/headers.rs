//! Ethernet / IPv4 / UDP / VXLAN / IGMP header helpers.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::net::Ipv4Addr;
use std::str::FromStr;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{MutableUdpPacket, UdpPacket};
use pnet::packet::Packet as _;
use pnet::util::MacAddr;

use crate::error::ConfigurationError;

pub const ETHER_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const VXLAN_HEADER_LEN: usize = 8;
pub const IGMP_LEN: usize = 8;

/// Bytes added in front of an inner frame by VXLAN encapsulation.
pub const VXLAN_OVERHEAD: usize =
    ETHER_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN + VXLAN_HEADER_LEN;

/// Longest inner frame whose outer IPv4 total length still fits 16 bits.
pub const MAX_INNER_LEN: usize =
    u16::MAX as usize - IPV4_HEADER_LEN - UDP_HEADER_LEN - VXLAN_HEADER_LEN;

/// IANA assigned VXLAN port.
pub const VXLAN_PORT: u16 = 4789;

/// "VNI present" flag of the VXLAN header.
pub const VXLAN_FLAG_VNI: u8 = 0x08;

pub const VNI_MAX: u32 = (1 << 24) - 1;

pub const OUTER_TTL: u8 = 64;

pub const ALL_SYSTEMS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
pub const ALL_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

pub const IGMP_V2_REPORT: u8 = 0x16;
pub const IGMP_LEAVE: u8 = 0x17;

const SOURCE_PORT_BASE: u16 = 49152;
const SOURCE_PORT_RANGE: u64 = 16384;

/// MAC address as the low 48 bits of a `u64`, first octet most significant.
pub type MacKey = u64;

pub fn mac_key(mac: MacAddr) -> MacKey {
    let MacAddr(a, b, c, d, e, f) = mac;
    u64::from_be_bytes([0, 0, a, b, c, d, e, f])
}

pub fn mac_from_key(key: MacKey) -> MacAddr {
    let b = key.to_be_bytes();
    MacAddr::new(b[2], b[3], b[4], b[5], b[6], b[7])
}

pub fn parse_mac(text: &str) -> Result<MacAddr, ConfigurationError> {
    MacAddr::from_str(text).map_err(|_| ConfigurationError::InvalidMac(text.to_string()))
}

/// Group bit set: multicast or broadcast.
pub fn is_multicast(mac: MacAddr) -> bool {
    mac.0 & 0x01 != 0
}

/// 01:80:C2:00:00:00 to 01:80:C2:00:00:0F, link local protocols a bridge must not forward.
pub fn is_reserved(mac: MacAddr) -> bool {
    mac_key(mac) & !0x0f == 0x0180_c200_0000
}

/// Ethernet address an IPv4 multicast group maps to.
pub fn multicast_mac(group: Ipv4Addr) -> MacAddr {
    let o = group.octets();
    MacAddr::new(0x01, 0x00, 0x5e, o[1] & 0x7f, o[2], o[3])
}

pub fn destination(frame: &[u8]) -> Option<MacAddr> {
    EthernetPacket::new(frame).map(|eth| eth.get_destination())
}

pub fn source(frame: &[u8]) -> Option<MacAddr> {
    EthernetPacket::new(frame).map(|eth| eth.get_source())
}

/// UDP source port for an inner frame: a hash of its Ethernet header folded into the dynamic
/// port range, so flows spread over ECMP paths.
pub fn source_port(inner: &[u8]) -> u16 {
    let mut hasher = DefaultHasher::new();
    hasher.write(&inner[..ETHER_HEADER_LEN.min(inner.len())]);
    SOURCE_PORT_BASE + (hasher.finish() % SOURCE_PORT_RANGE) as u16
}

/// Outer addressing of one encapsulated frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Outer {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub ip_id: u16,
    pub vni: u32,
}

/// Write Ethernet, IPv4, UDP and VXLAN headers into `hdr` (`VXLAN_OVERHEAD` bytes) for an
/// inner frame of `inner_len` bytes, at most `MAX_INNER_LEN`.
pub fn write_vxlan(hdr: &mut [u8], outer: &Outer, inner_len: usize) {
    debug_assert_eq!(hdr.len(), VXLAN_OVERHEAD);
    debug_assert!(inner_len <= MAX_INNER_LEN);

    let (eth, rest) = hdr.split_at_mut(ETHER_HEADER_LEN);
    let (ip, rest) = rest.split_at_mut(IPV4_HEADER_LEN);
    let (udp, vxlan) = rest.split_at_mut(UDP_HEADER_LEN);

    if let Some(mut eth) = MutableEthernetPacket::new(eth) {
        eth.set_destination(outer.dst_mac);
        eth.set_source(outer.src_mac);
        eth.set_ethertype(EtherTypes::Ipv4);
    }

    let udp_len = UDP_HEADER_LEN + VXLAN_HEADER_LEN + inner_len;
    write_ipv4(
        ip,
        outer.src_ip,
        outer.dst_ip,
        IpNextHeaderProtocols::Udp,
        OUTER_TTL,
        outer.ip_id,
        IPV4_HEADER_LEN + udp_len,
    );

    if let Some(mut udp) = MutableUdpPacket::new(udp) {
        udp.set_source(outer.src_port);
        udp.set_destination(outer.dst_port);
        udp.set_length(udp_len as u16);
        udp.set_checksum(0);
    }

    vxlan[0] = VXLAN_FLAG_VNI;
    vxlan[1..4].copy_from_slice(&[0, 0, 0]);
    vxlan[4..7].copy_from_slice(&outer.vni.to_be_bytes()[1..4]);
    vxlan[7] = 0;
}

fn write_ipv4(
    hdr: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: pnet::packet::ip::IpNextHeaderProtocol,
    ttl: u8,
    id: u16,
    total_len: usize,
) {
    if let Some(mut ip) = MutableIpv4Packet::new(hdr) {
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_dscp(0);
        ip.set_ecn(0);
        ip.set_total_length(total_len as u16);
        ip.set_identification(id);
        ip.set_flags(0);
        ip.set_fragment_offset(0);
        ip.set_ttl(ttl);
        ip.set_next_level_protocol(protocol);
        ip.set_source(src);
        ip.set_destination(dst);
        ip.set_checksum(0);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }
}

/// What decapsulation needs from a valid outer header stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tunneled {
    pub vni: u32,
    pub src_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub multicast: bool,
}

/// Validate the outer headers of a VXLAN frame. Returns `None` for anything that is not a
/// well-formed VXLAN over IPv4 frame addressed to `port`.
pub fn parse_vxlan(frame: &[u8], port: u16) -> Option<Tunneled> {
    if frame.len() < VXLAN_OVERHEAD + ETHER_HEADER_LEN {
        return None;
    }

    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }

    let ip = Ipv4Packet::new(eth.payload())?;
    if ip.get_version() != 4
        || ip.get_header_length() != 5
        || ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp
    {
        return None;
    }

    let udp = UdpPacket::new(&frame[ETHER_HEADER_LEN + IPV4_HEADER_LEN..])?;
    if udp.get_destination() != port {
        return None;
    }

    let vxlan = &frame[ETHER_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN..VXLAN_OVERHEAD];
    if vxlan[0] & VXLAN_FLAG_VNI == 0 {
        return None;
    }

    Some(Tunneled {
        vni: u32::from_be_bytes([0, vxlan[4], vxlan[5], vxlan[6]]),
        src_mac: eth.get_source(),
        src_ip: ip.get_source(),
        multicast: ip.get_destination().is_multicast() || is_multicast(eth.get_destination()),
    })
}

/// IGMPv2 membership report (`IGMP_V2_REPORT`) or leave (`IGMP_LEAVE`) for `group`.
/// Reports go to the group itself, leaves to all routers.
pub fn igmp_frame(kind: u8, src_mac: MacAddr, src_ip: Ipv4Addr, group: Ipv4Addr) -> Vec<u8> {
    let dst = if kind == IGMP_LEAVE { ALL_ROUTERS } else { group };
    let mut frame = vec![0u8; ETHER_HEADER_LEN + IPV4_HEADER_LEN + IGMP_LEN];

    {
        let (eth, rest) = frame.split_at_mut(ETHER_HEADER_LEN);
        let (ip, igmp) = rest.split_at_mut(IPV4_HEADER_LEN);

        if let Some(mut eth) = MutableEthernetPacket::new(eth) {
            eth.set_destination(multicast_mac(dst));
            eth.set_source(src_mac);
            eth.set_ethertype(EtherTypes::Ipv4);
        }

        write_ipv4(
            ip,
            src_ip,
            dst,
            IpNextHeaderProtocols::Igmp,
            1,
            0,
            IPV4_HEADER_LEN + IGMP_LEN,
        );

        igmp[0] = kind;
        igmp[1] = 0;
        igmp[4..8].copy_from_slice(&group.octets());
        let checksum = pnet::packet::util::checksum(igmp, 1);
        igmp[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_keys() {
        let mac = MacAddr::new(0x52, 0x54, 0x00, 0x12, 0x34, 0x56);
        assert_eq!(mac_key(mac), 0x5254_0012_3456);
        assert_eq!(mac_from_key(mac_key(mac)), mac);
    }

    #[test]
    fn classifies_addresses() {
        assert!(is_multicast(MacAddr::broadcast()));
        assert!(is_multicast(MacAddr::new(0x01, 0x00, 0x5e, 0, 0, 1)));
        assert!(!is_multicast(MacAddr::new(0x52, 0x54, 0, 0, 0, 1)));

        assert!(is_reserved(MacAddr::new(0x01, 0x80, 0xc2, 0, 0, 0x00)));
        assert!(is_reserved(MacAddr::new(0x01, 0x80, 0xc2, 0, 0, 0x0e)));
        assert!(!is_reserved(MacAddr::new(0x01, 0x80, 0xc2, 0, 0, 0x10)));
        assert!(!is_reserved(MacAddr::broadcast()));
    }

    #[test]
    fn multicast_mac_drops_high_bit() {
        assert_eq!(
            multicast_mac(Ipv4Addr::new(239, 129, 2, 3)),
            MacAddr::new(0x01, 0x00, 0x5e, 0x01, 0x02, 0x03)
        );
    }

    #[test]
    fn parses_mac_strings() {
        assert_eq!(
            parse_mac("52:54:00:aa:bb:cc").unwrap(),
            MacAddr::new(0x52, 0x54, 0x00, 0xaa, 0xbb, 0xcc)
        );
        assert!(parse_mac("52:54:00").is_err());
    }

    #[test]
    fn source_port_in_dynamic_range() {
        let a = source_port(&[1; 14]);
        let b = source_port(&[2; 14]);
        assert!(a >= 49152 && b >= 49152);
        assert_eq!(a, source_port(&[1; 14]));
    }

    #[test]
    fn vxlan_headers_parse_back() {
        let outer = Outer {
            src_mac: MacAddr::new(2, 0, 0, 0, 0, 1),
            dst_mac: MacAddr::new(2, 0, 0, 0, 0, 2),
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 50000,
            dst_port: VXLAN_PORT,
            ip_id: 7,
            vni: 0x00ab_cdef,
        };
        let mut frame = vec![0u8; VXLAN_OVERHEAD + 60];
        write_vxlan(&mut frame[..VXLAN_OVERHEAD], &outer, 60);

        let ip = Ipv4Packet::new(&frame[ETHER_HEADER_LEN..]).unwrap();
        assert_eq!(ip.get_checksum(), ipv4::checksum(&ip));
        assert_eq!(ip.get_total_length() as usize, frame.len() - ETHER_HEADER_LEN);

        let tunneled = parse_vxlan(&frame, VXLAN_PORT).unwrap();
        assert_eq!(tunneled.vni, 0x00ab_cdef);
        assert_eq!(tunneled.src_ip, outer.src_ip);
        assert_eq!(tunneled.src_mac, outer.src_mac);
        assert!(!tunneled.multicast);

        assert_eq!(parse_vxlan(&frame, 8472), None);
        frame[ETHER_HEADER_LEN + IPV4_HEADER_LEN + UDP_HEADER_LEN] = 0;
        assert_eq!(parse_vxlan(&frame, VXLAN_PORT), None);
    }

    #[test]
    fn igmp_report_and_leave() {
        let mac = MacAddr::new(2, 0, 0, 0, 0, 1);
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let group = Ipv4Addr::new(239, 1, 1, 1);

        let report = igmp_frame(IGMP_V2_REPORT, mac, ip, group);
        assert_eq!(destination(&report), Some(multicast_mac(group)));
        let ipv4 = Ipv4Packet::new(&report[ETHER_HEADER_LEN..]).unwrap();
        assert_eq!(ipv4.get_destination(), group);
        assert_eq!(ipv4.get_ttl(), 1);
        assert_eq!(ipv4.get_next_level_protocol(), IpNextHeaderProtocols::Igmp);
        let igmp = &report[ETHER_HEADER_LEN + IPV4_HEADER_LEN..];
        assert_eq!(igmp[0], IGMP_V2_REPORT);
        assert_eq!(&igmp[4..8], &group.octets());
        assert_eq!(pnet::packet::util::checksum(igmp, 1), u16::from_be_bytes([igmp[2], igmp[3]]));

        let leave = igmp_frame(IGMP_LEAVE, mac, ip, group);
        let ipv4 = Ipv4Packet::new(&leave[ETHER_HEADER_LEN..]).unwrap();
        assert_eq!(ipv4.get_destination(), ALL_ROUTERS);
        assert_eq!(leave[ETHER_HEADER_LEN + IPV4_HEADER_LEN], IGMP_LEAVE);
    }
}
