//! Request PDU: `|VER(1)|CMD(1)|RSV(1)|ATYP(1)|DST.ADDR|DST.PORT(2)|`.

use crate::buffer::Buffer;
use crate::socks5::{DestAddr, ParseOutcome, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, CMD_CONNECT, CMD_UDP_ASSOCIATE, VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Connect,
    UdpAssociate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Addr { cmd: Cmd, atyp: u8 },
    DomainLen { cmd: Cmd },
    Domain { cmd: Cmd, len: u8 },
}

#[derive(Debug, PartialEq, Eq)]
pub struct RequestDone {
    pub cmd: Cmd,
    pub addr: DestAddr,
    pub port: u16,
}

#[derive(Debug)]
pub struct RequestParser {
    stage: Stage,
}

impl Default for RequestParser {
    fn default() -> Self {
        RequestParser { stage: Stage::Header }
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, buf: &mut Buffer) -> ParseOutcome<RequestDone> {
        loop {
            match self.stage {
                Stage::Header => {
                    if buf.readable() < 4 {
                        return ParseOutcome::Incomplete;
                    }
                    let mut hdr = [0u8; 4];
                    buf.consume(&mut hdr, 4);
                    if hdr[0] != VERSION {
                        return ParseOutcome::Fatal("request: unsupported SOCKS version");
                    }
                    let cmd = match hdr[1] {
                        CMD_CONNECT => Cmd::Connect,
                        CMD_UDP_ASSOCIATE => Cmd::UdpAssociate,
                        _ => return ParseOutcome::Fatal("request: unsupported CMD"),
                    };
                    // hdr[2] is RSV, ignored.
                    self.stage = Stage::Addr { cmd, atyp: hdr[3] };
                }
                Stage::Addr { cmd, atyp } => match atyp {
                    ATYP_IPV4 => {
                        if buf.readable() < 4 + 2 {
                            return ParseOutcome::Incomplete;
                        }
                        let mut octets = [0u8; 4];
                        buf.consume(&mut octets, 4);
                        let port = read_port(buf);
                        return ParseOutcome::Done(RequestDone {
                            cmd,
                            addr: DestAddr::V4(octets),
                            port,
                        });
                    }
                    ATYP_IPV6 => {
                        if buf.readable() < 16 + 2 {
                            return ParseOutcome::Incomplete;
                        }
                        let mut octets = [0u8; 16];
                        buf.consume(&mut octets, 16);
                        let port = read_port(buf);
                        return ParseOutcome::Done(RequestDone {
                            cmd,
                            addr: DestAddr::V6(octets),
                            port,
                        });
                    }
                    ATYP_DOMAIN => {
                        self.stage = Stage::DomainLen { cmd };
                    }
                    _ => return ParseOutcome::Fatal("request: unknown ATYP"),
                },
                Stage::DomainLen { cmd } => {
                    if buf.readable() < 1 {
                        return ParseOutcome::Incomplete;
                    }
                    let mut b = [0u8; 1];
                    buf.consume(&mut b, 1);
                    self.stage = Stage::Domain { cmd, len: b[0] };
                }
                Stage::Domain { cmd, len } => {
                    let len = len as usize;
                    if buf.readable() < len + 2 {
                        return ParseOutcome::Incomplete;
                    }
                    let mut name = vec![0u8; len];
                    buf.consume(&mut name, len);
                    let port = read_port(buf);
                    let domain = String::from_utf8_lossy(&name).into_owned();
                    return ParseOutcome::Done(RequestDone {
                        cmd,
                        addr: DestAddr::Domain(domain),
                        port,
                    });
                }
            }
        }
    }
}

fn read_port(buf: &mut Buffer) -> u16 {
    let mut p = [0u8; 2];
    buf.consume(&mut p, 2);
    u16::from_be_bytes(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bytes: &[u8]) -> Buffer {
        let mut b = Buffer::create(64);
        b.append(bytes);
        b
    }

    #[test]
    fn ipv4_connect_decodes() {
        let mut buf = feed(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50]);
        let out = RequestParser::new().step(&mut buf);
        assert_eq!(
            out,
            ParseOutcome::Done(RequestDone {
                cmd: Cmd::Connect,
                addr: DestAddr::V4([127, 0, 0, 1]),
                port: 80,
            })
        );
    }

    #[test]
    fn domain_connect_decodes() {
        let mut bytes = vec![0x05, 0x01, 0x00, 0x03, 11];
        bytes.extend_from_slice(b"example.com");
        bytes.extend_from_slice(&443u16.to_be_bytes());
        let mut buf = feed(&bytes);
        let out = RequestParser::new().step(&mut buf);
        assert_eq!(
            out,
            ParseOutcome::Done(RequestDone {
                cmd: Cmd::Connect,
                addr: DestAddr::Domain("example.com".into()),
                port: 443,
            })
        );
    }

    #[test]
    fn bind_command_is_fatal() {
        let mut buf = feed(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50]);
        let out = RequestParser::new().step(&mut buf);
        assert_eq!(out, ParseOutcome::Fatal("request: unsupported CMD"));
    }

    #[test]
    fn udp_associate_decodes() {
        let mut buf = feed(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0x00, 0x00]);
        let out = RequestParser::new().step(&mut buf);
        assert_eq!(
            out,
            ParseOutcome::Done(RequestDone {
                cmd: Cmd::UdpAssociate,
                addr: DestAddr::V4([0, 0, 0, 0]),
                port: 0,
            })
        );
    }

    #[test]
    fn unknown_atyp_is_fatal() {
        let mut buf = feed(&[0x05, 0x01, 0x00, 0x02, 0, 0]);
        let out = RequestParser::new().step(&mut buf);
        assert_eq!(out, ParseOutcome::Fatal("request: unknown ATYP"));
    }

    #[test]
    fn short_read_resumes_across_domain_stages() {
        let mut bytes = vec![0x05, 0x01, 0x00, 0x03, 3];
        bytes.extend_from_slice(b"abc");
        bytes.extend_from_slice(&9000u16.to_be_bytes());

        let mut buf = Buffer::create(64);
        let mut p = RequestParser::new();
        let mut last = ParseOutcome::Incomplete;
        for b in &bytes {
            buf.append(&[*b]);
            last = p.step(&mut buf);
            if !matches!(last, ParseOutcome::Incomplete) {
                break;
            }
        }
        assert_eq!(
            last,
            ParseOutcome::Done(RequestDone {
                cmd: Cmd::Connect,
                addr: DestAddr::Domain("abc".into()),
                port: 9000,
            })
        );
    }
}
