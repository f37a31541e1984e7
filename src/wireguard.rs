//! Constants and small helpers borrowed from the WireGuard wire format.
//!
//! The relay only ever looks at the first byte of the decrypted payload; it does not
//! parse or validate WireGuard messages beyond that.

use std::time::Duration;

/// WireGuard's own keepalive/rekey deadline. A session with no handshake traffic for this
/// long is considered dead and its upstream socket is torn down.
pub const REJECT_AFTER_TIME: Duration = Duration::from_secs(180);

/// Overhead of a WireGuard transport-data message: 4-byte type+reserved, 4-byte receiver
/// index, 8-byte counter, 16-byte AEAD tag.
pub const WG_DATA_OVERHEAD: usize = 32;

/// WireGuard pads transport data to a multiple of 16 bytes; the reported tunnel MTU is
/// masked down to the same granularity.
pub const WG_DATA_LEN_MASK: usize = !0xF;

pub const MESSAGE_TYPE_HANDSHAKE_INITIATION: u8 = 1;
pub const MESSAGE_TYPE_HANDSHAKE_RESPONSE: u8 = 2;
#[allow(dead_code)]
pub const MESSAGE_TYPE_COOKIE_REPLY: u8 = 3;
#[allow(dead_code)]
pub const MESSAGE_TYPE_TRANSPORT_DATA: u8 = 4;

/// Whether `first_byte` belongs to a message class that should refresh a session's idle
/// deadline. Only handshake initiation and response do; cookie replies and transport data
/// do not (WireGuard's own keepalive contract).
pub fn refreshes_deadline(first_byte: u8) -> bool {
    matches!(
        first_byte,
        MESSAGE_TYPE_HANDSHAKE_INITIATION | MESSAGE_TYPE_HANDSHAKE_RESPONSE
    )
}

/// Computes the tunnel MTU we advertise in the "new session" log event: the space left for
/// WireGuard transport data once our own transform overhead and WireGuard's own message
/// overhead are subtracted, rounded down to WireGuard's padding granularity.
pub fn tunnel_mtu(max_proxy_packet_size: usize, transform_overhead: usize) -> usize {
    max_proxy_packet_size
        .saturating_sub(transform_overhead)
        .saturating_sub(WG_DATA_OVERHEAD)
        & WG_DATA_LEN_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_handshake_messages_refresh_deadline() {
        assert!(refreshes_deadline(1));
        assert!(refreshes_deadline(2));
        assert!(!refreshes_deadline(3));
        assert!(!refreshes_deadline(4));
        assert!(!refreshes_deadline(0));
    }

    #[test]
    fn tunnel_mtu_is_masked_to_16_bytes() {
        let mtu = tunnel_mtu(1392, 0);
        assert_eq!(mtu % 16, 0);
    }
}
