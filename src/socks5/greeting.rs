//! Greeting PDU: `|VER(1)|NMETHODS(1)|METHODS(1-255)|`.

use crate::buffer::Buffer;
use crate::socks5::{ParseOutcome, VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Header,
    Methods { nmethods: u8 },
}

/// Result of a fully decoded greeting: whether the server selected
/// USER/PASS auth (`0x02`) or no-auth (`0x00`), and the two reply
/// bytes to enqueue on the client's write buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct GreetingDone {
    pub auth_required: bool,
    pub reply: [u8; 2],
}

/// Resumable decoder for one greeting PDU.
#[derive(Debug)]
pub struct GreetingParser {
    stage: Stage,
}

impl Default for GreetingParser {
    fn default() -> Self {
        GreetingParser { stage: Stage::Header }
    }
}

impl GreetingParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance decoding as far as the buffer allows.
    ///
    /// `auth_required` reflects whether the server was configured with
    /// non-empty credentials; it alone decides the reply's method
    /// byte, independent of what the client offered.
    pub fn step(&mut self, buf: &mut Buffer, auth_required: bool) -> ParseOutcome<GreetingDone> {
        loop {
            match self.stage {
                Stage::Header => {
                    if buf.readable() < 2 {
                        return ParseOutcome::Incomplete;
                    }
                    let mut hdr = [0u8; 2];
                    buf.consume(&mut hdr, 2);
                    if hdr[0] != VERSION {
                        return ParseOutcome::Fatal("greeting: unsupported SOCKS version");
                    }
                    self.stage = Stage::Methods { nmethods: hdr[1] };
                }
                Stage::Methods { nmethods } => {
                    if buf.readable() < nmethods as usize {
                        return ParseOutcome::Incomplete;
                    }
                    // Methods offered are consumed without being
                    // interpreted: the server's choice is driven
                    // solely by its own configured credentials.
                    buf.skip(nmethods as usize);

                    let method = if auth_required { 0x02 } else { 0x00 };
                    return ParseOutcome::Done(GreetingDone {
                        auth_required,
                        reply: [VERSION, method],
                    });
                }
            }
        }
    }
}
