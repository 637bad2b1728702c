//! VXLAN tunnel endpoint.
//!
//! One side of the brick faces the underlay ("tunnel" side), the other faces the overlay
//! neighbors. Each overlay edge is a port bound to one VNI and one multicast group:
//!
//! - Frames entering from a port are wrapped in Ethernet/IPv4/UDP/VXLAN headers and sent out
//!   the tunnel side. Known unicast destinations go to the remote VTEP they were learned
//!   from, everything else to the port's multicast group.
//! - Frames entering from the tunnel side are validated, matched against each port's VNI,
//!   stripped and delivered to that port only. Unknown unicast is dropped, never flooded.
//! - Binding a VNI joins the group with an IGMP report, losing the port leaves it.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};

use arrayvec::ArrayVec;
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::brick::{Brick, BrickType, Context};
use crate::config::BrickConfig;
use crate::error::{ConfigurationError, Error, ResourceError, Result, TopologyError};
use crate::graph::{Graph, NodeId};
use crate::headers::{self, MacKey, Outer, Tunneled, MAX_INNER_LEN, VXLAN_OVERHEAD};
use crate::mask::Mask;
use crate::packet::Packet;
use crate::side::{CapacityClass, Side};
use crate::MAX_BURST;

pub const BRICK_TYPE: BrickType = BrickType {
    name: "vtep",
    capacity: CapacityClass::Multiple,
    init,
};

fn default_tunnel() -> Side {
    Side::East
}

fn default_udp_port() -> u16 {
    headers::VXLAN_PORT
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VtepOptions {
    /// Underlay source address.
    pub ip: Ipv4Addr,

    /// Underlay source MAC, "xx:xx:xx:xx:xx:xx".
    pub mac: String,

    /// Side facing the underlay.
    #[serde(default = "default_tunnel")]
    pub tunnel: Side,

    /// Rewrite the caller's packets instead of working on copies.
    #[serde(default)]
    pub no_copy: bool,

    /// Deliver decapsulated unicast without checking the destination is known to the port.
    /// Also stops learning port MACs on encapsulation.
    #[serde(default)]
    pub no_inner_mac_check: bool,

    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
}

impl VtepOptions {
    pub fn new(ip: Ipv4Addr, mac: &str) -> VtepOptions {
        VtepOptions {
            ip,
            mac: mac.to_string(),
            tunnel: default_tunnel(),
            no_copy: false,
            no_inner_mac_check: false,
            udp_port: default_udp_port(),
        }
    }
}

/// Remote VTEP a given inner MAC lives behind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

#[derive(Debug)]
struct Port {
    vni: u32,
    group: Ipv4Addr,
    destinations: HashMap<MacKey, Destination>,
    known_macs: HashSet<MacKey>,
}

impl Port {
    fn new(vni: u32, group: Ipv4Addr) -> Port {
        Port {
            vni,
            group,
            destinations: HashMap::new(),
            known_macs: HashSet::new(),
        }
    }
}

#[derive(Debug)]
pub struct Vtep {
    ip: Ipv4Addr,
    mac: MacAddr,
    tunnel: Side,
    no_copy: bool,
    no_inner_mac_check: bool,
    udp_port: u16,
    // Indexed by edge index on the overlay side.
    ports: Vec<Option<Port>>,
    ip_id: AtomicU16,
}

fn init(config: &BrickConfig) -> Result<Box<dyn Brick>> {
    let options: VtepOptions = config.required_options()?;
    Ok(Box::new(Vtep::new(&options)?))
}

impl Vtep {
    pub fn new(options: &VtepOptions) -> Result<Vtep> {
        Ok(Vtep {
            ip: options.ip,
            mac: headers::parse_mac(&options.mac)?,
            tunnel: options.tunnel,
            no_copy: options.no_copy,
            no_inner_mac_check: options.no_inner_mac_check,
            udp_port: options.udp_port,
            ports: Vec::new(),
            ip_id: AtomicU16::new(0),
        })
    }

    pub fn tunnel_side(&self) -> Side {
        self.tunnel
    }

    /// Bind the port linking `neighbor` to `vni` and join `group` on the tunnel side.
    pub fn add_vni(
        &mut self,
        ctx: &mut Context<'_>,
        neighbor: NodeId,
        vni: u32,
        group: Ipv4Addr,
    ) -> Result<()> {
        if vni > headers::VNI_MAX {
            return Err(ConfigurationError::InvalidVni(vni).into());
        }
        if !group.is_multicast() {
            return Err(ConfigurationError::NotMulticast(group).into());
        }

        let index = ctx
            .find_edge(self.tunnel.opposite(), neighbor)
            .ok_or(TopologyError::NotLinked)?;
        if self.port(index).is_some() {
            return Err(ConfigurationError::PortConfigured(index).into());
        }
        if self.ports.iter().flatten().any(|p| p.vni == vni) {
            return Err(ConfigurationError::VniInUse(vni).into());
        }

        let joined = self.group_in_use(group);
        if self.ports.len() <= index as usize {
            self.ports.resize_with(index as usize + 1, || None);
        }
        self.ports[index as usize] = Some(Port::new(vni, group));

        info!(node = %ctx.name(), port = index, vni, %group, "vni added");

        if !joined {
            self.membership(ctx, headers::IGMP_V2_REPORT, group)?;
        }
        Ok(())
    }

    /// Unbind the port linking `neighbor`, leaving its group if no other port uses it.
    pub fn remove_vni(&mut self, ctx: &mut Context<'_>, neighbor: NodeId) -> Result<()> {
        let index = ctx
            .find_edge(self.tunnel.opposite(), neighbor)
            .ok_or(TopologyError::NotLinked)?;
        self.remove_port(ctx, index)
    }

    /// Declare `mac` as living behind the port linking `neighbor`.
    pub fn add_mac(&mut self, ctx: &mut Context<'_>, neighbor: NodeId, mac: MacAddr) -> Result<()> {
        let side = self.tunnel.opposite();
        let index = ctx
            .find_edge(side, neighbor)
            .ok_or(TopologyError::NotLinked)?;
        let port = self
            .ports
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(TopologyError::EdgeNotFound { side, edge: index })?;
        port.known_macs.insert(headers::mac_key(mac));
        Ok(())
    }

    pub fn vni(&self, port: u16) -> Option<u32> {
        self.port(port).map(|p| p.vni)
    }

    pub fn group(&self, port: u16) -> Option<Ipv4Addr> {
        self.port(port).map(|p| p.group)
    }

    /// Cached remote endpoint for `inner` on `port`.
    pub fn destination(&self, port: u16, inner: MacAddr) -> Option<Destination> {
        self.port(port)?
            .destinations
            .get(&headers::mac_key(inner))
            .copied()
    }

    /// Whether `mac` is known to live behind `port`.
    pub fn knows(&self, port: u16, mac: MacAddr) -> bool {
        self.port(port)
            .map_or(false, |p| p.known_macs.contains(&headers::mac_key(mac)))
    }

    fn port(&self, index: u16) -> Option<&Port> {
        self.ports.get(index as usize).and_then(Option::as_ref)
    }

    fn group_in_use(&self, group: Ipv4Addr) -> bool {
        self.ports.iter().flatten().any(|p| p.group == group)
    }

    fn remove_port(&mut self, ctx: &mut Context<'_>, index: u16) -> Result<()> {
        let port = match self.ports.get_mut(index as usize).and_then(Option::take) {
            Some(port) => port,
            None => return Ok(()),
        };

        info!(node = %ctx.name(), port = index, vni = port.vni, "vni removed");

        if !self.group_in_use(port.group) {
            self.membership(ctx, headers::IGMP_LEAVE, port.group)?;
        }
        Ok(())
    }

    fn membership(&self, ctx: &mut Context<'_>, kind: u8, group: Ipv4Addr) -> Result<()> {
        // Hosts never report for the all systems group.
        if group == headers::ALL_SYSTEMS {
            return Ok(());
        }
        let frame = headers::igmp_frame(kind, self.mac, self.ip, group);
        ctx.forward(self.tunnel, &mut [Packet::new(&frame)], Mask::first(1))
    }

    fn encapsulate(
        &mut self,
        ctx: &mut Context<'_>,
        edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        let port = match self.ports.get_mut(edge as usize).and_then(Option::as_mut) {
            Some(port) => port,
            None => {
                trace!(node = %ctx.name(), port = edge, "no vni on port, burst dropped");
                return Ok(());
            }
        };

        let mut copies: ArrayVec<Packet, MAX_BURST> = ArrayVec::new();
        let mut sent = mask;
        let mut failure: Option<Error> = None;

        for i in mask {
            let (dst, src) = match (
                headers::destination(pkts[i].data()),
                headers::source(pkts[i].data()),
            ) {
                (Some(dst), Some(src)) => (dst, src),
                _ => {
                    sent.remove(i);
                    continue;
                }
            };

            let known = if headers::is_multicast(dst) {
                None
            } else {
                port.destinations.get(&headers::mac_key(dst)).copied()
            };
            let (dst_ip, dst_mac) = match known {
                Some(d) => (d.ip, d.mac),
                None => {
                    if !self.no_inner_mac_check {
                        port.known_macs.insert(headers::mac_key(src));
                    }
                    (port.group, headers::multicast_mac(port.group))
                }
            };

            let outer = Outer {
                src_mac: self.mac,
                dst_mac,
                src_ip: self.ip,
                dst_ip,
                src_port: headers::source_port(pkts[i].data()),
                dst_port: self.udp_port,
                ip_id: self.ip_id.fetch_add(1, Ordering::Relaxed),
                vni: port.vni,
            };

            let inner_len = pkts[i].len();
            let r = if inner_len > MAX_INNER_LEN {
                Err(ResourceError::TooLong {
                    len: inner_len,
                    max: MAX_INNER_LEN,
                })
            } else if self.no_copy {
                pkts[i]
                    .prepend(VXLAN_OVERHEAD)
                    .map(|hdr| headers::write_vxlan(hdr, &outer, inner_len))
            } else {
                let mut copy = pkts[i].clone();
                let r = copy
                    .prepend(VXLAN_OVERHEAD)
                    .map(|hdr| headers::write_vxlan(hdr, &outer, inner_len));
                if r.is_ok() {
                    copies.push(copy);
                }
                r
            };

            if let Err(err) = r {
                sent.remove(i);
                trace!(node = %ctx.name(), slot = i, error = %err, "encapsulation failed");
                if failure.is_none() {
                    failure = Some(err.into());
                }
            }
        }

        if self.no_copy {
            ctx.forward(self.tunnel, pkts, sent)?;
        } else {
            let count = copies.len();
            ctx.forward(self.tunnel, &mut copies, Mask::first(count))?;
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn decapsulate(&mut self, ctx: &mut Context<'_>, pkts: &mut [Packet], mask: Mask) -> Result<()> {
        let mut tunneled: ArrayVec<(usize, Tunneled), MAX_BURST> = ArrayVec::new();
        for i in mask {
            match headers::parse_vxlan(pkts[i].data(), self.udp_port) {
                Some(t) => tunneled.push((i, t)),
                None => trace!(node = %ctx.name(), slot = i, "not vxlan, dropped"),
            }
        }
        if tunneled.is_empty() {
            return Ok(());
        }

        let overlay = self.tunnel.opposite();
        for index in 0..self.ports.len() {
            let port = match self.ports[index].as_mut() {
                Some(port) => port,
                None => continue,
            };

            let vni = port.vni;
            let mut inner: ArrayVec<Packet, MAX_BURST> = ArrayVec::new();
            for &(i, t) in tunneled.iter().filter(|(_, t)| t.vni == vni) {
                let frame = &pkts[i].data()[VXLAN_OVERHEAD..];
                let (dst, src) = match (headers::destination(frame), headers::source(frame)) {
                    (Some(dst), Some(src)) => (dst, src),
                    _ => continue,
                };

                if t.multicast && !headers::is_multicast(src) {
                    port.destinations.insert(
                        headers::mac_key(src),
                        Destination {
                            ip: t.src_ip,
                            mac: t.src_mac,
                        },
                    );
                }

                if !self.no_inner_mac_check
                    && !headers::is_multicast(dst)
                    && !port.known_macs.contains(&headers::mac_key(dst))
                {
                    trace!(node = %ctx.name(), port = index, "unknown inner destination, dropped");
                    continue;
                }

                let mut pkt = pkts[i].clone();
                pkt.adj(VXLAN_OVERHEAD)?;
                inner.push(pkt);
            }

            let count = inner.len();
            ctx.burst_edge(overlay, index as u16, &mut inner, Mask::first(count))?;
        }

        Ok(())
    }
}

impl Brick for Vtep {
    fn burst(
        &mut self,
        ctx: &mut Context<'_>,
        from: Side,
        edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        if from == self.tunnel {
            self.decapsulate(ctx, pkts, mask)
        } else {
            self.encapsulate(ctx, edge, pkts, mask)
        }
    }

    fn unlink_notify(&mut self, ctx: &mut Context<'_>, side: Side, edge: u16) -> Result<()> {
        if side == self.tunnel {
            return Ok(());
        }
        self.remove_port(ctx, edge)
    }

    fn unlink(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        for index in 0..self.ports.len() {
            self.remove_port(ctx, index as u16)?;
        }
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// `Vtep::add_vni` on the VTEP node `vtep`.
pub fn add_vni(
    graph: &mut Graph,
    vtep: NodeId,
    neighbor: NodeId,
    vni: u32,
    group: Ipv4Addr,
) -> Result<()> {
    graph.with_brick::<Vtep, _, _>(vtep, |v, ctx| v.add_vni(ctx, neighbor, vni, group))
}

/// `Vtep::remove_vni` on the VTEP node `vtep`.
pub fn remove_vni(graph: &mut Graph, vtep: NodeId, neighbor: NodeId) -> Result<()> {
    graph.with_brick::<Vtep, _, _>(vtep, |v, ctx| v.remove_vni(ctx, neighbor))
}

/// `Vtep::add_mac` on the VTEP node `vtep`.
pub fn add_mac(graph: &mut Graph, vtep: NodeId, neighbor: NodeId, mac: MacAddr) -> Result<()> {
    graph.with_brick::<Vtep, _, _>(vtep, |v, ctx| v.add_mac(ctx, neighbor, mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_yaml() {
        let options: VtepOptions =
            serde_yaml::from_str("{ ip: 10.0.0.1, mac: \"02:00:00:00:00:01\" }").unwrap();
        assert_eq!(options, VtepOptions::new(Ipv4Addr::new(10, 0, 0, 1), "02:00:00:00:00:01"));
        assert_eq!(options.tunnel, Side::East);
        assert_eq!(options.udp_port, 4789);
    }

    #[test]
    fn rejects_bad_mac() {
        let options = VtepOptions::new(Ipv4Addr::new(10, 0, 0, 1), "not-a-mac");
        assert!(matches!(
            Vtep::new(&options),
            Err(Error::Configuration(ConfigurationError::InvalidMac(_)))
        ));
    }

    #[test]
    fn init_requires_options() {
        assert!(matches!(
            init(&BrickConfig::new("vx")),
            Err(Error::Configuration(ConfigurationError::MissingOptions(_)))
        ));
    }
}
