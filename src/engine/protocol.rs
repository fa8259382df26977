// TAPLINK — ENGINE: PROTOCOL MODULE
// Wire format, nonce discipline, keepalive codec, size watermarks.
//
// Datagram layout: nonce(24) || poly1305 tag(16) || xsalsa20 ciphertext.
// Nonce layout: prefix(4, big-endian, per-run) || counter(20, big-endian).
// Inner plaintext: Ethernet frame (>= 64 bytes) or 3-byte keepalive
// 0xFE || size_hi || size_lo.

// ============================================================================
// WIRE CONSTANTS
// ============================================================================

/// Full nonce carried in front of every datagram.
pub const NONCE_BYTES: usize = 24;
/// Per-run prefix drawn from the persistent prefix file.
pub const PREFIX_BYTES: usize = 4;
/// Poly1305 authenticator.
pub const TAG_BYTES: usize = 16;
/// Bytes on the wire that are not plaintext.
pub const WIRE_OVERHEAD: usize = NONCE_BYTES + TAG_BYTES;

/// Staging buffer size: a standard Ethernet MTU frame plus framing overhead.
pub const BUF_BYTES: usize = 2048;
/// Largest plaintext that still fits a wire buffer.
pub const MAX_PLAINTEXT: usize = BUF_BYTES - WIRE_OVERHEAD;

/// Anything shorter than a minimum Ethernet frame is control traffic.
pub const MIN_FRAME_BYTES: usize = 64;

/// Keepalive plaintext: tag byte followed by a big-endian u16 size report.
pub const KEEPALIVE_TAG: u8 = 0xFE;
pub const KEEPALIVE_LEN: usize = 3;

// ============================================================================
// NONCE
// ============================================================================

/// 24-byte tunnel nonce. The derived ordering is byte-wise lexicographic over
/// the whole value, so the per-run prefix participates: a restarted peer's
/// nonces (bumped prefix) compare greater than everything from its last run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Nonce(pub [u8; NONCE_BYTES]);

impl Nonce {
    /// The inbound watermark before anything has been accepted.
    pub const ZERO: Nonce = Nonce([0u8; NONCE_BYTES]);

    /// Fresh outbound nonce: prefix set, counter zero. The counter is bumped
    /// before every send, so counter 0 never reaches the wire.
    pub fn from_prefix(prefix: u32) -> Nonce {
        let mut bytes = [0u8; NONCE_BYTES];
        bytes[..PREFIX_BYTES].copy_from_slice(&prefix.to_be_bytes());
        Nonce(bytes)
    }

    /// Advance the 20-byte counter as a big-endian integer with carry.
    /// The prefix bytes are never touched.
    pub fn bump(&mut self) {
        for i in (PREFIX_BYTES..NONCE_BYTES).rev() {
            self.0[i] = self.0[i].wrapping_add(1);
            if self.0[i] != 0 {
                break;
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_BYTES] {
        &self.0
    }

    pub fn prefix(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

// ============================================================================
// KEEPALIVE CODEC
// ============================================================================

pub fn build_keepalive(size: u16) -> [u8; KEEPALIVE_LEN] {
    [KEEPALIVE_TAG, (size >> 8) as u8, (size & 0xFF) as u8]
}

/// Decode a short plaintext as a keepalive. Only the exact 3-byte 0xFE shape
/// is interpreted; every other short payload is None (ignored by the caller,
/// which leaves room for other control shapes on the wire).
pub fn parse_keepalive(plain: &[u8]) -> Option<u16> {
    if plain.len() == KEEPALIVE_LEN && plain[0] == KEEPALIVE_TAG {
        Some(((plain[1] as u16) << 8) | plain[2] as u16)
    } else {
        None
    }
}

// ============================================================================
// SIZE WATERMARKS
// ============================================================================

/// Cooperative MTU probe state. All three only ever increase. Sizes count the
/// full datagram including the 24-byte nonce. Under a healthy path,
/// biggest_sent converges to biggest_tried.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct SizeWatermarks {
    /// Largest datagram handed to the UDP socket on the egress path.
    pub biggest_tried: u16,
    /// Largest datagram the peer reports having received from us.
    pub biggest_sent: u16,
    /// Largest datagram we have received and decrypted.
    pub biggest_rcvd: u16,
}

impl SizeWatermarks {
    pub fn record_tried(&mut self, wire_len: usize) {
        let len = wire_len.min(u16::MAX as usize) as u16;
        if self.biggest_tried < len {
            self.biggest_tried = len;
        }
    }

    pub fn record_rcvd(&mut self, wire_len: usize) {
        let len = wire_len.min(u16::MAX as usize) as u16;
        if self.biggest_rcvd < len {
            self.biggest_rcvd = len;
        }
    }

    /// Fold in a size the peer reported via keepalive.
    pub fn record_peer_report(&mut self, size: u16) {
        if self.biggest_sent < size {
            self.biggest_sent = size;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_nonce_has_prefix_and_zero_counter() {
        let n = Nonce::from_prefix(0xDEADBEEF);
        assert_eq!(n.prefix(), 0xDEADBEEF);
        assert_eq!(&n.0[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(n.0[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bump_increments_last_byte() {
        let mut n = Nonce::from_prefix(1);
        n.bump();
        assert_eq!(n.0[23], 1);
        n.bump();
        assert_eq!(n.0[23], 2);
    }

    #[test]
    fn bump_carries_big_endian() {
        let mut n = Nonce::from_prefix(1);
        n.0[23] = 0xFF;
        n.bump();
        assert_eq!(n.0[23], 0);
        assert_eq!(n.0[22], 1);

        // Carry across several bytes
        let mut n = Nonce::from_prefix(1);
        for b in &mut n.0[20..] {
            *b = 0xFF;
        }
        n.bump();
        assert_eq!(&n.0[20..], &[0, 0, 0, 0]);
        assert_eq!(n.0[19], 1);
    }

    #[test]
    fn bump_never_touches_prefix() {
        let mut n = Nonce::from_prefix(7);
        for b in &mut n.0[PREFIX_BYTES..] {
            *b = 0xFF;
        }
        n.bump();
        // Counter exhausted and wrapped, prefix intact
        assert_eq!(n.prefix(), 7);
        assert!(n.0[PREFIX_BYTES..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bump_is_strictly_increasing() {
        let mut n = Nonce::from_prefix(1);
        let mut prev = n;
        for _ in 0..1000 {
            n.bump();
            assert!(n > prev);
            prev = n;
        }
    }

    #[test]
    fn ordering_is_lexicographic_prefix_first() {
        let old_run = {
            let mut n = Nonce::from_prefix(3);
            for b in &mut n.0[PREFIX_BYTES..] {
                *b = 0xFF;
            }
            n
        };
        // A restarted peer with a bumped prefix outranks its entire old run.
        let new_run = Nonce::from_prefix(4);
        assert!(new_run > old_run);
        assert!(Nonce::from_prefix(1) > Nonce::ZERO);
    }

    #[test]
    fn keepalive_roundtrip() {
        for size in [0u16, 1, 1500, u16::MAX] {
            let ka = build_keepalive(size);
            assert_eq!(ka[0], KEEPALIVE_TAG);
            assert_eq!(parse_keepalive(&ka), Some(size));
        }
    }

    #[test]
    fn keepalive_rejects_other_shapes() {
        assert_eq!(parse_keepalive(&[]), None);
        assert_eq!(parse_keepalive(&[KEEPALIVE_TAG]), None);
        assert_eq!(parse_keepalive(&[KEEPALIVE_TAG, 0, 0, 0]), None);
        assert_eq!(parse_keepalive(&[0xFD, 0x05, 0xDC]), None);
        // 63 bytes: too short to be a frame, not a keepalive either
        assert_eq!(parse_keepalive(&[0u8; 63]), None);
    }

    #[test]
    fn watermarks_only_increase() {
        let mut w = SizeWatermarks::default();
        w.record_tried(1500);
        w.record_tried(128);
        assert_eq!(w.biggest_tried, 1500);

        w.record_rcvd(256);
        w.record_rcvd(128);
        assert_eq!(w.biggest_rcvd, 256);

        w.record_peer_report(1500);
        w.record_peer_report(700);
        assert_eq!(w.biggest_sent, 1500);
    }

    #[test]
    fn watermark_saturates_at_u16() {
        let mut w = SizeWatermarks::default();
        w.record_tried(70_000);
        assert_eq!(w.biggest_tried, u16::MAX);
    }
}
