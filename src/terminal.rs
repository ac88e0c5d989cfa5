//! Operator stdin command loop: `freeze` toggles forwarding, `stop`
//! shuts the process down. Runs on a dedicated blocking thread since
//! `std::io::Stdin` has no first-class async reader here worth pulling
//! in a dependency for.

use std::io::{self, BufRead};

use crate::extra_warn;
use crate::freeze::Freeze;

/// Block on stdin, dispatching one recognized command per line, until
/// stdin closes or `stop` is issued.
pub fn run(freeze: Freeze) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::warn!("terminal: error reading stdin: {}", e);
                break;
            }
        };

        match line.trim() {
            "freeze" => {
                let now_frozen = freeze.toggle();
                extra_warn!("freeze toggled, frozen={}", now_frozen);
            }
            "stop" => {
                extra_warn!("stop requested from terminal");
                // SAFETY: raise(2) with SIGINT only ever signals this
                // process; it never touches memory.
                unsafe {
                    libc::raise(libc::SIGINT);
                }
                break;
            }
            "" => {}
            other => {
                log::warn!("terminal: unknown command {:?}", other);
            }
        }
    }
}
