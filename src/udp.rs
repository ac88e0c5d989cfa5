//! UDP-associate relay (RFC 1928 §7).
//!
//! One `UdpSocket` serves a single association: the first datagram
//! received pins the client's source address, after which every
//! datagram from that address is unwrapped and forwarded to its
//! `DST.ADDR`/`DST.PORT`, and every datagram from anywhere else is
//! treated as a remote reply, wrapped in the same header format and
//! sent back to the pinned client address.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::oneshot;

use crate::errors::{Error, Result};
use crate::socks5::{ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6};

const MAX_DATAGRAM: usize = 65536;

/// Drive one UDP association until `stop` fires (the TCP control
/// connection closed or errored) or the socket itself errors.
pub async fn run_association(socket: UdpSocket, mut stop: oneshot::Receiver<()>) -> Result<()> {
    let mut client_addr: Option<SocketAddr> = None;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = &mut stop => {
                log::info!("udp association ending: control connection closed");
                return Ok(());
            }
            res = socket.recv_from(&mut buf) => {
                let (n, from) = res.map_err(Error::SocketError)?;
                let datagram = buf[..n].to_vec();

                if client_addr.is_none() {
                    client_addr = Some(from);
                }

                if client_addr == Some(from) {
                    match decode_client_datagram(&datagram).await {
                        Some((target, payload)) => {
                            if let Err(e) = socket.send_to(&payload, target).await {
                                log::warn!("udp relay forward to {} failed: {}", target, e);
                            }
                        }
                        None => log::warn!("dropped malformed udp datagram from client"),
                    }
                } else {
                    let framed = encode_reply_datagram(from, &datagram);
                    let pinned = client_addr.unwrap();
                    if let Err(e) = socket.send_to(&framed, pinned).await {
                        log::warn!("udp relay reply to client failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Strip the `|RSV(2)|FRAG(1)|ATYP(1)|DST.ADDR|DST.PORT|` header and
/// resolve the target. Fragmented datagrams (`FRAG != 0`) are dropped;
/// the relay does not reassemble fragments.
async fn decode_client_datagram(datagram: &[u8]) -> Option<(SocketAddr, Vec<u8>)> {
    if datagram.len() < 4 || datagram[2] != 0x00 {
        return None;
    }

    let atyp = datagram[3];
    let mut pos = 4;

    match atyp {
        ATYP_IPV4 => {
            if datagram.len() < pos + 6 {
                return None;
            }
            let octets = [datagram[pos], datagram[pos + 1], datagram[pos + 2], datagram[pos + 3]];
            pos += 4;
            let port = u16::from_be_bytes([datagram[pos], datagram[pos + 1]]);
            pos += 2;
            Some((SocketAddr::from((Ipv4Addr::from(octets), port)), datagram[pos..].to_vec()))
        }
        ATYP_IPV6 => {
            if datagram.len() < pos + 18 {
                return None;
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&datagram[pos..pos + 16]);
            pos += 16;
            let port = u16::from_be_bytes([datagram[pos], datagram[pos + 1]]);
            pos += 2;
            Some((SocketAddr::from((Ipv6Addr::from(octets), port)), datagram[pos..].to_vec()))
        }
        ATYP_DOMAIN => {
            if datagram.len() < pos + 1 {
                return None;
            }
            let len = datagram[pos] as usize;
            pos += 1;
            if datagram.len() < pos + len + 2 {
                return None;
            }
            let host = String::from_utf8_lossy(&datagram[pos..pos + len]).into_owned();
            pos += len;
            let port = u16::from_be_bytes([datagram[pos], datagram[pos + 1]]);
            pos += 2;
            let resolved = lookup_host((host.as_str(), port)).await.ok()?.next()?;
            Some((resolved, datagram[pos..].to_vec()))
        }
        _ => None,
    }
}

fn encode_reply_datagram(from: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00, 0x00, 0x00];
    match from {
        SocketAddr::V4(v4) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(v6) => {
            out.push(ATYP_IPV6);
            out.extend_from_slice(&v6.ip().octets());
            out.extend_from_slice(&v6.port().to_be_bytes());
        }
    }
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decodes_ipv4_client_datagram() {
        let mut datagram = vec![0x00, 0x00, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0x00, 0x50];
        datagram.extend_from_slice(b"hello");
        let (target, payload) = decode_client_datagram(&datagram).await.unwrap();
        assert_eq!(target, SocketAddr::from((Ipv4Addr::new(127, 0, 0, 1), 80)));
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn rejects_fragmented_datagram() {
        let datagram = vec![0x00, 0x00, 0x01, ATYP_IPV4, 127, 0, 0, 1, 0x00, 0x50];
        assert!(decode_client_datagram(&datagram).await.is_none());
    }

    #[test]
    fn reply_datagram_is_framed_with_source_address() {
        let from = SocketAddr::from((Ipv4Addr::new(93, 184, 216, 34), 443));
        let framed = encode_reply_datagram(from, b"payload");
        assert_eq!(&framed[..3], &[0x00, 0x00, 0x00]);
        assert_eq!(framed[3], ATYP_IPV4);
        assert_eq!(&framed[4..8], &[93, 184, 216, 34]);
        assert_eq!(&framed[8..10], &443u16.to_be_bytes());
        assert_eq!(&framed[10..], b"payload");
    }
}
