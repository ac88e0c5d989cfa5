//! USER/PASS auth PDU, RFC 1929: `|VER(1)|ULEN(1)|UNAME|PLEN(1)|PASSWD|`.

use crate::buffer::Buffer;
use crate::socks5::{ParseOutcome, MAX_CRED_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Header,
    Uname { ulen: u8 },
    Plen { uname: Vec<u8> },
    Passwd { uname: Vec<u8>, plen: u8 },
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthDone {
    /// Credentials matched; `reply` is the two success bytes to
    /// enqueue.
    Success { reply: [u8; 2] },
    /// Credentials did not match — not itself fatal to the PDU parse,
    /// but the caller treats an auth mismatch as a protocol failure.
    Mismatch,
}

#[derive(Debug)]
pub struct AuthParser {
    stage: Stage,
    version: u8,
}

impl Default for AuthParser {
    fn default() -> Self {
        AuthParser {
            stage: Stage::Header,
            version: 0,
        }
    }
}

impl AuthParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, buf: &mut Buffer, username: &[u8], password: &[u8]) -> ParseOutcome<AuthDone> {
        loop {
            match &self.stage {
                Stage::Header => {
                    if buf.readable() < 2 {
                        return ParseOutcome::Incomplete;
                    }
                    let mut hdr = [0u8; 2];
                    buf.consume(&mut hdr, 2);
                    self.version = hdr[0];
                    let ulen = hdr[1];
                    if ulen > MAX_CRED_LEN {
                        return ParseOutcome::Fatal("auth: ULEN exceeds 20");
                    }
                    self.stage = Stage::Uname { ulen };
                }
                Stage::Uname { ulen } => {
                    let ulen = *ulen as usize;
                    if buf.readable() < ulen {
                        return ParseOutcome::Incomplete;
                    }
                    let mut uname = vec![0u8; ulen];
                    buf.consume(&mut uname, ulen);
                    self.stage = Stage::Plen { uname };
                }
                Stage::Plen { uname } => {
                    if buf.readable() < 1 {
                        return ParseOutcome::Incomplete;
                    }
                    let mut b = [0u8; 1];
                    buf.consume(&mut b, 1);
                    let plen = b[0];
                    if plen > MAX_CRED_LEN {
                        return ParseOutcome::Fatal("auth: PLEN exceeds 20");
                    }
                    self.stage = Stage::Passwd {
                        uname: uname.clone(),
                        plen,
                    };
                }
                Stage::Passwd { uname, plen } => {
                    let plen = *plen as usize;
                    if buf.readable() < plen {
                        return ParseOutcome::Incomplete;
                    }
                    let mut passwd = vec![0u8; plen];
                    buf.consume(&mut passwd, plen);

                    // Exact-length byte comparison: these fields are
                    // length-prefixed, not NUL-terminated, so embedded
                    // NULs must not be treated as an early terminator.
                    if uname.as_slice() == username && passwd.as_slice() == password {
                        return ParseOutcome::Done(AuthDone::Success {
                            reply: [self.version, 0x00],
                        });
                    }
                    return ParseOutcome::Done(AuthDone::Mismatch);
                }
            }
        }
    }
}
