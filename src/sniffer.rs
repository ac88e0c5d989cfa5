//! Opportunistic plaintext protocol sniffers consulted while
//! forwarding an already-established tunnel. Neither sniffer mutates
//! the buffer it inspects — they only log.

const HEXDUMP_MAX: usize = 128;

fn direction_label(is_client: bool) -> &'static str {
    if is_client {
        "client -> remote"
    } else {
        "remote -> client"
    }
}

/// Recognize and log a plaintext HTTP message prefix.
///
/// Matches if the buffer begins with four ASCII letters (an HTTP verb
/// like `GET `) or the literal bytes `HTTP` (a status line). Logs up
/// to and including the header/body separator `\r\n\r\n` if present,
/// otherwise the whole buffer.
pub fn sniff_http(data: &[u8], is_client: bool) -> bool {
    if data.len() < 4 {
        return false;
    }

    let starts_with_letters = data[..4].iter().all(|b| b.is_ascii_alphabetic());
    let starts_with_http = &data[..4] == b"HTTP";
    if !starts_with_letters && !starts_with_http {
        return false;
    }

    let to_log = find_subslice(data, b"\r\n\r\n").map(|pos| pos + 4).unwrap_or(data.len());
    let text = String::from_utf8_lossy(&data[..to_log]);
    log::info!("HTTP {}, {} bytes:\n{}", direction_label(is_client), to_log, text);
    true
}

/// Recognize and log an unfragmented, unmasked text WebSocket frame
/// (opcode `0x1`, payload length encoded in the 7-bit short form).
pub fn sniff_websocket(data: &[u8], is_client: bool) -> bool {
    if data.len() < 2 {
        return false;
    }

    let opcode = data[0] & 0x0F;
    if opcode != 0x1 {
        return false;
    }

    let masked = data[1] & 0x80 != 0;
    if masked {
        return false;
    }

    let payload_len = (data[1] & 0x7F) as usize;
    if payload_len > 125 {
        // Extended length forms aren't "short", fall through to hexdump.
        return false;
    }

    let header_len = 2;
    if data.len() < header_len + payload_len {
        return false;
    }

    let payload = &data[header_len..header_len + payload_len];
    let text = String::from_utf8_lossy(payload);
    log::info!(
        "WebSocket {}, {} bytes:\n{}",
        direction_label(is_client),
        payload_len,
        text
    );
    true
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Fallback logging for payloads neither sniffer recognized: a hex
/// dump truncated to the first 128 bytes.
pub fn hexdump(label: &str, data: &[u8]) {
    let max = data.len().min(HEXDUMP_MAX);
    let mut hex = String::with_capacity(max * 3);
    for b in &data[..max] {
        hex.push_str(&format!("{:02x} ", b));
    }
    let suffix = if data.len() > max { "...(truncated)" } else { "" };
    log::info!("{} hex ({} bytes): {}{}", label, data.len(), hex, suffix);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_http_request_line() {
        assert!(sniff_http(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", true));
    }

    #[test]
    fn recognizes_http_status_line() {
        assert!(sniff_http(b"HTTP/1.1 200 OK\r\n\r\n", false));
    }

    #[test]
    fn rejects_binary_prefix() {
        assert!(!sniff_http(&[0x05, 0x01, 0x00, 0x02], true));
    }

    #[test]
    fn recognizes_unmasked_text_frame() {
        let mut frame = vec![0x81, 0x05];
        frame.extend_from_slice(b"hello");
        assert!(sniff_websocket(&frame, true));
    }

    #[test]
    fn rejects_masked_frame() {
        let frame = vec![0x81, 0x85, 1, 2, 3, 4, b'h', b'i'];
        assert!(!sniff_websocket(&frame, true));
    }

    #[test]
    fn rejects_binary_opcode() {
        let frame = vec![0x82, 0x05, 1, 2, 3, 4, 5];
        assert!(!sniff_websocket(&frame, true));
    }
}
