//! Localhost UDP transport that partitions participants by domain.
//!
//! Every participant owns one socket on `127.0.0.1`. The port of participant
//! slot `s` in domain `d` follows the well-known unicast formula
//! `7400 + 250*d + 10 + 2*s`; a participant takes the first free slot and
//! publishes by sending the frame to every other slot of its domain.

use bytes::Bytes;
use parking_lot::Mutex;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::frame::{Frame, MAX_DATAGRAM};
use crate::{closed_receiver, Bus, BusError, BusMessage, BusResult, TopicTable};

pub const MAX_DOMAIN_ID: u16 = 232;
pub const PARTICIPANT_SLOTS: u16 = 32;

const PORT_BASE: u32 = 7400;
const DOMAIN_GAIN: u32 = 250;
const UNICAST_OFFSET: u32 = 10;
const PARTICIPANT_GAIN: u32 = 2;

pub fn participant_port(domain: u16, slot: u16) -> u16 {
    let port = PORT_BASE
        + DOMAIN_GAIN * u32::from(domain)
        + UNICAST_OFFSET
        + PARTICIPANT_GAIN * u32::from(slot);
    // MAX_DOMAIN_ID and PARTICIPANT_SLOTS keep this below 65536.
    port as u16
}

pub struct UdpDomainBus {
    domain: u16,
    slot: u16,
    guid: Uuid,
    socket: Arc<UdpSocket>,
    table: Arc<TopicTable>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl UdpDomainBus {
    /// Binds the first free participant slot of `domain` and starts the
    /// receive loop. Must be called from within a Tokio runtime.
    pub async fn bind(domain: u32) -> BusResult<Self> {
        let domain = u16::try_from(domain)
            .ok()
            .filter(|domain| *domain <= MAX_DOMAIN_ID)
            .ok_or(BusError::InvalidDomain(domain))?;

        let (socket, slot) = bind_free_slot(domain).await?;
        let guid = Uuid::new_v4();
        let socket = Arc::new(socket);
        let table = Arc::new(TopicTable::default());
        let reader = tokio::spawn(read_loop(
            Arc::clone(&socket),
            Arc::clone(&table),
            domain,
            guid,
        ));

        debug!(
            target: "transport::udp",
            domain,
            slot,
            port = participant_port(domain, slot),
            %guid,
            "participant bound"
        );

        Ok(Self {
            domain,
            slot,
            guid,
            socket,
            table,
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn domain(&self) -> u16 {
        self.domain
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn local_port(&self) -> u16 {
        participant_port(self.domain, self.slot)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn bind_free_slot(domain: u16) -> BusResult<(UdpSocket, u16)> {
    for slot in 0..PARTICIPANT_SLOTS {
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, participant_port(domain, slot));
        match UdpSocket::bind(addr).await {
            Ok(socket) => return Ok((socket, slot)),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                trace!(target: "transport::udp", domain, slot, "participant slot taken");
            }
            Err(err) => {
                return Err(BusError::Transport(format!(
                    "failed to bind participant socket {addr}: {err}"
                )))
            }
        }
    }
    Err(BusError::NoFreeSlot { domain })
}

async fn read_loop(socket: Arc<UdpSocket>, table: Arc<TopicTable>, domain: u16, guid: Uuid) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                ) =>
            {
                // Reported for sends to empty slots on some platforms.
                continue;
            }
            Err(err) => {
                warn!(target: "transport::udp", error = %err, "participant socket failed");
                break;
            }
        };
        let frame = match Frame::decode(&buf[..len]) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(target: "transport::udp", %from, error = %err, "dropping foreign datagram");
                continue;
            }
        };
        if frame.domain != domain || frame.origin == guid {
            continue;
        }
        let receivers = table.deliver(BusMessage {
            topic: frame.topic,
            payload: frame.payload,
        });
        trace!(target: "transport::udp", %from, len, receivers, "frame delivered");
    }
}

impl Bus for UdpDomainBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        if self.is_closed() {
            return closed_receiver();
        }
        self.table.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let wire = Frame {
            domain: self.domain,
            origin: self.guid,
            topic: topic.to_string(),
            payload,
        }
        .encode()
        .map_err(|err| BusError::Transport(err.to_string()))?;

        for slot in (0..PARTICIPANT_SLOTS).filter(|slot| *slot != self.slot) {
            let target = SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::LOCALHOST,
                participant_port(self.domain, slot),
            ));
            match self.socket.try_send_to(&wire, target) {
                Ok(_) => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) => {}
                // Announcements repeat, so a frame dropped under pressure is recovered.
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    trace!(target: "transport::udp", slot, "send buffer full; frame dropped");
                }
                Err(err) => {
                    return Err(BusError::Transport(format!(
                        "send to slot {slot} failed: {err}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.table.clear();
        debug!(target: "transport::udp", domain = self.domain, slot = self.slot, "participant closed");
    }
}

impl Drop for UdpDomainBus {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}
