//! Passive packet capture: AF_PACKET channel, UDP dissection, SIP/RTP
//! dispatch into the shared capture state.
//!
//! pnet's datalink receiver is blocking, so this runs on its own OS thread;
//! emitted segments cross into the async side through a bounded channel
//! whose `blocking_send` is the backpressure point: when the ASR hop backs
//! up, the capture thread stalls and the kernel sheds UDP for us.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pnet::datalink::{self, Channel};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::calls::{CaptureState, EmittedSegment};
use crate::error::CaptureError;
use crate::unix_now;

pub const SIP_PORT: u16 = 5060;

pub struct SnifferConfig {
    pub iface: String,
    pub rtp_port_min: u16,
    pub rtp_port_max: u16,
}

/// Runs the capture loop until `shutdown` is raised or the channel dies.
pub fn run(
    config: SnifferConfig,
    state: Arc<Mutex<CaptureState>>,
    tx: mpsc::Sender<EmittedSegment>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), CaptureError> {
    let interface = datalink::interfaces()
        .into_iter()
        .find(|i| i.name == config.iface)
        .ok_or_else(|| CaptureError::InterfaceNotFound(config.iface.clone()))?;

    let (_dl_tx, mut dl_rx) = match datalink::channel(&interface, Default::default())? {
        Channel::Ethernet(tx, rx) => (tx, rx),
        _ => return Err(CaptureError::UnsupportedChannel),
    };

    info!(iface = %config.iface, "capture started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let frame = match dl_rx.next() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "capture read error");
                continue;
            }
        };

        let Some((src_ip, dst_ip, src_port, dst_port, payload)) = dissect_udp(frame) else {
            continue;
        };

        let emitted = if src_port == SIP_PORT || dst_port == SIP_PORT {
            state.lock().handle_sip(&src_ip, &dst_ip, payload, unix_now())
        } else if (config.rtp_port_min..=config.rtp_port_max).contains(&dst_port) {
            state.lock().handle_rtp(&src_ip, &dst_ip, payload, unix_now())
        } else {
            continue;
        };

        for segment in emitted {
            // Bounded queue: block the capture thread under backpressure
            // rather than dropping an accepted segment.
            if tx.blocking_send(segment).is_err() {
                debug!("segment channel closed, capture exiting");
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Peels Ethernet → IPv4 → UDP and returns addressing plus the UDP payload.
fn dissect_udp(frame: &[u8]) -> Option<(String, String, u16, u16, &[u8])> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }
    // Borrow the payload out of the frame directly so the UDP payload can
    // be returned without copying.
    let ip_bytes = &frame[EthernetPacket::minimum_packet_size()..];
    let ip = Ipv4Packet::new(ip_bytes)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }
    let header_len = ip.get_header_length() as usize * 4;
    let total_len = (ip.get_total_length() as usize).min(ip_bytes.len());
    if header_len >= total_len {
        return None;
    }
    let udp_bytes = &ip_bytes[header_len..total_len];
    let udp = UdpPacket::new(udp_bytes)?;
    let src_port = udp.get_source();
    let dst_port = udp.get_destination();
    let payload = &udp_bytes[8.min(udp_bytes.len())..];
    Some((
        ip.get_source().to_string(),
        ip.get_destination().to_string(),
        src_port,
        dst_port,
        payload,
    ))
}
