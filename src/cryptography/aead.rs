// TAPLINK — NaCl crypto_box AEAD (X25519 + XSalsa20-Poly1305)
// Detached seal/open over fixed staging buffers — no allocation on the hot
// path. Wire layout per datagram: nonce(24) || tag(16) || ciphertext, which
// is NaCl crypto_box output with the 16 boxzero framing bytes stripped.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::AeadInPlace;
use crypto_box::{Nonce as BoxNonce, SalsaBox};

use crate::engine::protocol::{NONCE_BYTES, TAG_BYTES, WIRE_OVERHEAD};

/// Seal `plain` under `nonce`, writing the complete wire datagram
/// nonce || tag || ciphertext into `wire`. Returns the datagram length.
/// `wire` must have room for `plain.len() + WIRE_OVERHEAD` bytes.
pub fn seal_packet(
    k: &SalsaBox,
    nonce: &[u8; NONCE_BYTES],
    plain: &[u8],
    wire: &mut [u8],
) -> usize {
    let total = WIRE_OVERHEAD + plain.len();
    wire[..NONCE_BYTES].copy_from_slice(nonce);
    wire[WIRE_OVERHEAD..total].copy_from_slice(plain);
    let tag = k
        .encrypt_in_place_detached(
            BoxNonce::from_slice(&nonce[..]),
            b"",
            &mut wire[WIRE_OVERHEAD..total],
        )
        .unwrap();
    wire[NONCE_BYTES..WIRE_OVERHEAD].copy_from_slice(tag.as_slice());
    total
}

/// Open the post-nonce portion of a datagram (tag || ciphertext) into
/// `plain`. Returns the plaintext length, or None on authentication failure
/// or a malformed length. `plain` may hold garbage after a failed open; the
/// caller must not read it.
pub fn open_packet(
    k: &SalsaBox,
    nonce: &[u8; NONCE_BYTES],
    sealed: &[u8],
    plain: &mut [u8],
) -> Option<usize> {
    if sealed.len() < TAG_BYTES {
        return None;
    }
    let len = sealed.len() - TAG_BYTES;
    if len > plain.len() {
        return None;
    }
    plain[..len].copy_from_slice(&sealed[TAG_BYTES..]);
    let tag = GenericArray::from_slice(&sealed[..TAG_BYTES]);
    k.decrypt_in_place_detached(
        BoxNonce::from_slice(&nonce[..]),
        b"",
        &mut plain[..len],
        tag,
    )
    .ok()?;
    Some(len)
}

// ============================================================================
// TESTS
// ============================================================================
