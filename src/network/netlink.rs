//! Synchronous rtnetlink client
//!
//! Route messages are built with netlink-packet-route and exchanged over a
//! blocking NETLINK_ROUTE socket. The caller blocks until the kernel
//! acknowledges the request or the dump completes.

use crate::error::{Error, Result};
use crate::network::mapper::{RawAddress, RawLink};
use ipnet::IpNet;
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST, NetlinkBuffer, NetlinkMessage,
    NetlinkPayload,
};
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{
    InfoData, InfoKind, InfoVlan, LinkAttribute, LinkFlag, LinkInfo, LinkMessage,
};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use std::io;
use std::net::IpAddr;

const RECV_BUFFER: usize = 64 * 1024;

/// A route message with the header flags it is sent with
#[derive(Debug, Clone)]
pub struct Request {
    message: RouteNetlinkMessage,
    flags: u16,
}

impl Request {
    fn create(message: RouteNetlinkMessage) -> Self {
        Self {
            message,
            flags: NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL,
        }
    }

    fn change(message: RouteNetlinkMessage) -> Self {
        Self {
            message,
            flags: NLM_F_REQUEST | NLM_F_ACK,
        }
    }

    fn dump(message: RouteNetlinkMessage) -> Self {
        Self {
            message,
            flags: NLM_F_REQUEST | NLM_F_DUMP,
        }
    }

    pub fn message(&self) -> &RouteNetlinkMessage {
        &self.message
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Serialize into a single netlink datagram
    pub fn encode(self, seq: u32) -> Vec<u8> {
        let mut packet = NetlinkMessage::from(self.message);
        packet.header.flags = self.flags;
        packet.header.sequence_number = seq;
        packet.finalize();

        let mut buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut buf);
        buf
    }
}

fn link_message(index: u32) -> LinkMessage {
    let mut message = LinkMessage::default();
    message.header.index = index;
    message
}

pub fn new_vlan(name: &str, parent_index: u32, vlan_id: u16) -> Request {
    let mut message = link_message(0);
    message.attributes.push(LinkAttribute::IfName(name.to_string()));
    message.attributes.push(LinkAttribute::Link(parent_index));
    message.attributes.push(LinkAttribute::LinkInfo(vec![
        LinkInfo::Kind(InfoKind::Vlan),
        LinkInfo::Data(InfoData::Vlan(vec![InfoVlan::Id(vlan_id)])),
    ]));
    Request::create(RouteNetlinkMessage::NewLink(message))
}

pub fn new_bridge(name: &str) -> Request {
    let mut message = link_message(0);
    message.attributes.push(LinkAttribute::IfName(name.to_string()));
    message
        .attributes
        .push(LinkAttribute::LinkInfo(vec![LinkInfo::Kind(InfoKind::Bridge)]));
    Request::create(RouteNetlinkMessage::NewLink(message))
}

/// Enslave link `index` to `master_index`; 0 releases it
pub fn set_master(index: u32, master_index: u32) -> Request {
    let mut message = link_message(index);
    message.attributes.push(LinkAttribute::Controller(master_index));
    Request::change(RouteNetlinkMessage::SetLink(message))
}

pub fn set_up(index: u32) -> Request {
    let mut message = link_message(index);
    message.header.flags.push(LinkFlag::Up);
    message.header.change_mask.push(LinkFlag::Up);
    Request::change(RouteNetlinkMessage::SetLink(message))
}

pub fn delete_link(index: u32) -> Request {
    Request::change(RouteNetlinkMessage::DelLink(link_message(index)))
}

pub fn add_address(index: u32, address: &IpNet) -> Request {
    Request::create(RouteNetlinkMessage::NewAddress(address_message(
        index, address,
    )))
}

pub fn remove_address(index: u32, address: &IpNet) -> Request {
    Request::change(RouteNetlinkMessage::DelAddress(address_message(
        index, address,
    )))
}

fn address_message(index: u32, address: &IpNet) -> AddressMessage {
    let mut message = AddressMessage::default();
    message.header.index = index;
    message.header.prefix_len = address.prefix_len();
    message.header.family = match address {
        IpNet::V4(_) => AddressFamily::Inet,
        IpNet::V6(_) => AddressFamily::Inet6,
    };

    // IPv4 needs IFA_LOCAL for the interface address, IFA_ADDRESS alone
    // means the peer on point-to-point links
    if let IpNet::V4(_) = address {
        message.attributes.push(AddressAttribute::Local(address.addr()));
    }
    message.attributes.push(AddressAttribute::Address(address.addr()));
    message
}

pub fn get_links() -> Request {
    Request::dump(RouteNetlinkMessage::GetLink(LinkMessage::default()))
}

pub fn get_addresses() -> Request {
    Request::dump(RouteNetlinkMessage::GetAddress(AddressMessage::default()))
}

/// Project a link dump entry onto the fields the mapper needs
pub fn raw_link(message: &LinkMessage) -> RawLink {
    let mut link = RawLink {
        index: message.header.index,
        up: message.header.flags.contains(&LinkFlag::Up),
        ..Default::default()
    };

    for attribute in &message.attributes {
        match attribute {
            LinkAttribute::IfName(name) => link.name = name.clone(),
            LinkAttribute::Link(index) => link.parent_index = Some(*index),
            LinkAttribute::Controller(index) => link.master_index = Some(*index),
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    match info {
                        LinkInfo::Kind(kind) => link.kind = Some(kind_name(kind)),
                        LinkInfo::Data(InfoData::Vlan(vlan)) => {
                            link.vlan_id = vlan.iter().find_map(|attr| match attr {
                                InfoVlan::Id(id) => Some(*id),
                                _ => None,
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    link
}

fn kind_name(kind: &InfoKind) -> String {
    match kind {
        InfoKind::Vlan => "vlan".to_string(),
        InfoKind::Bridge => "bridge".to_string(),
        InfoKind::Other(name) => name.clone(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

/// Project an address dump entry, `None` when it carries no IP
pub fn raw_address(message: &AddressMessage) -> Option<RawAddress> {
    let local = message.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Local(ip) => Some(*ip),
        _ => None,
    });
    let address = message.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Address(ip) => Some(*ip),
        _ => None,
    });

    let ip: IpAddr = local.or(address)?;
    let address = IpNet::new(ip, message.header.prefix_len).ok()?;
    Some(RawAddress {
        index: message.header.index,
        address,
    })
}

/// A NETLINK_ROUTE socket connected to the kernel
pub struct RouteSocket {
    socket: Socket,
    seq: u32,
}

impl RouteSocket {
    /// Open, bind and connect a blocking route socket
    pub fn open() -> Result<Self> {
        let socket_error = |op: &str, source: io::Error| Error::Netlink {
            op: op.to_string(),
            source,
        };

        let mut socket =
            Socket::new(NETLINK_ROUTE).map_err(|e| socket_error("open route socket", e))?;
        socket
            .bind_auto()
            .map_err(|e| socket_error("bind route socket", e))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| socket_error("connect route socket", e))?;

        Ok(Self { socket, seq: 0 })
    }

    /// Send a request and block until the kernel acknowledges it
    pub fn execute(&mut self, op: &str, request: Request) -> Result<()> {
        self.exchange(op, request, |_| Ok(()))
    }

    /// Send a dump request and collect every reply
    pub fn dump(&mut self, op: &str, request: Request) -> Result<Vec<RouteNetlinkMessage>> {
        let mut replies = Vec::new();
        self.exchange(op, request, |message| {
            replies.push(message);
            Ok(())
        })?;
        Ok(replies)
    }

    /// Dump every link on the host
    pub fn links(&mut self) -> Result<Vec<RawLink>> {
        Ok(self
            .dump("dump links", get_links())?
            .iter()
            .filter_map(|message| match message {
                RouteNetlinkMessage::NewLink(link) => Some(raw_link(link)),
                _ => None,
            })
            .collect())
    }

    /// Dump every IPv4 and IPv6 address on the host
    pub fn addresses(&mut self) -> Result<Vec<RawAddress>> {
        Ok(self
            .dump("dump addresses", get_addresses())?
            .iter()
            .filter_map(|message| match message {
                RouteNetlinkMessage::NewAddress(address) => raw_address(address),
                _ => None,
            })
            .collect())
    }

    fn exchange(
        &mut self,
        op: &str,
        request: Request,
        mut on_reply: impl FnMut(RouteNetlinkMessage) -> Result<()>,
    ) -> Result<()> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;

        self.socket
            .send(&request.encode(seq), 0)
            .map_err(|e| Error::Netlink {
                op: op.to_string(),
                source: e,
            })?;

        let mut buf = Vec::with_capacity(RECV_BUFFER);
        loop {
            buf.clear();
            match self.socket.recv(&mut buf, 0) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(Error::Netlink {
                        op: op.to_string(),
                        source: e,
                    });
                }
            }

            let mut offset = 0;
            while offset < buf.len() {
                let (message, length) = decode(&buf[offset..])?;
                offset += length;

                if message.header.sequence_number != seq {
                    continue;
                }
                match message.payload {
                    NetlinkPayload::Done(_) => return Ok(()),
                    NetlinkPayload::Error(err) => {
                        return match err.code {
                            // A zero code is the acknowledgement
                            None => Ok(()),
                            Some(code) => Err(Error::Netlink {
                                op: op.to_string(),
                                source: io::Error::from_raw_os_error(-code.get()),
                            }),
                        };
                    }
                    NetlinkPayload::InnerMessage(inner) => on_reply(inner)?,
                    _ => {}
                }
            }
        }
    }
}

/// Decode the first message of a datagram, returning it with the aligned
/// number of bytes it occupies
fn decode(bytes: &[u8]) -> Result<(NetlinkMessage<RouteNetlinkMessage>, usize)> {
    let length = NetlinkBuffer::new_checked(bytes)
        .map_err(|e| Error::NetlinkParse(e.to_string()))?
        .length() as usize;
    if length == 0 || length > bytes.len() {
        return Err(Error::NetlinkParse(format!(
            "message length {} with {} bytes left",
            length,
            bytes.len()
        )));
    }

    let message = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&bytes[..length])
        .map_err(|e| Error::NetlinkParse(e.to_string()))?;
    Ok((message, ((length + 3) & !3).min(bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_of(request: &Request) -> &LinkMessage {
        match request.message() {
            RouteNetlinkMessage::NewLink(link) | RouteNetlinkMessage::SetLink(link) => link,
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_new_vlan_request() {
        let request = new_vlan("lv-eth0.100", 2, 100);
        assert_ne!(request.flags() & NLM_F_EXCL, 0);

        let link = raw_link(link_of(&request));
        assert_eq!(link.name, "lv-eth0.100");
        assert_eq!(link.parent_index, Some(2));
        assert_eq!(link.kind.as_deref(), Some("vlan"));
        assert_eq!(link.vlan_id, Some(100));
    }

    #[test]
    fn test_set_up_and_release() {
        let request = set_up(7);
        let link = link_of(&request);
        assert_eq!(link.header.index, 7);
        assert!(link.header.change_mask.contains(&LinkFlag::Up));
        assert!(raw_link(link).up);

        let release = set_master(7, 0);
        assert_eq!(raw_link(link_of(&release)).master_index, Some(0));
        assert_eq!(release.flags() & NLM_F_CREATE, 0);
    }

    #[test]
    fn test_address_request_family_and_prefix() {
        let v4 = address_message(3, &"10.0.0.1/24".parse().unwrap());
        assert_eq!(v4.header.family, AddressFamily::Inet);
        assert_eq!(v4.header.prefix_len, 24);

        let v6 = address_message(3, &"fd00::1/64".parse().unwrap());
        assert_eq!(v6.header.family, AddressFamily::Inet6);
        assert!(
            !v6.attributes
                .iter()
                .any(|a| matches!(a, AddressAttribute::Local(_)))
        );
        assert_eq!(
            raw_address(&v6).unwrap().address,
            "fd00::1/64".parse::<IpNet>().unwrap()
        );
    }

    #[test]
    fn test_raw_address_prefers_local() {
        let mut message = AddressMessage::default();
        message.header.index = 4;
        message.header.prefix_len = 32;
        message
            .attributes
            .push(AddressAttribute::Address("10.0.0.2".parse().unwrap()));
        message
            .attributes
            .push(AddressAttribute::Local("10.0.0.1".parse().unwrap()));

        let address = raw_address(&message).unwrap();
        assert_eq!(address.index, 4);
        assert_eq!(address.address, "10.0.0.1/32".parse::<IpNet>().unwrap());

        assert!(raw_address(&AddressMessage::default()).is_none());
    }

    #[test]
    fn test_encoded_request_decodes() {
        let bytes = new_bridge("lb-lab1").encode(42);
        let (message, length) = decode(&bytes).unwrap();

        assert_eq!(length, bytes.len());
        assert_eq!(message.header.sequence_number, 42);
        match message.payload {
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
                let link = raw_link(&link);
                assert_eq!(link.name, "lb-lab1");
                assert_eq!(link.kind.as_deref(), Some("bridge"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_truncated_datagram() {
        let bytes = new_bridge("lb-lab1").encode(1);
        assert!(decode(&bytes[..bytes.len() - 4]).is_err());
        assert!(decode(&bytes[..8]).is_err());
    }

    #[test]
    fn test_dump_sees_loopback() {
        let mut socket = RouteSocket::open().unwrap();
        let links = socket.links().unwrap();
        assert!(links.iter().any(|l| l.name == "lo"));
    }
}
