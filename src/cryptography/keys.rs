// TAPLINK — KEY FILES + PRECOMPUTATION
// Key files hold one line of 64 hex characters (32 bytes). Decoded secret
// bytes are wiped once the key object owns them.

use std::io;
use std::path::Path;

use crypto_box::{PublicKey, SalsaBox, SecretKey};
use zeroize::Zeroize;

pub const KEY_BYTES: usize = 32;
const KEY_HEX_CHARS: usize = 2 * KEY_BYTES;

/// Decode a key file's contents: exactly 64 hex characters (either case),
/// at most one trailing newline.
fn decode_hex_key(contents: &str) -> Option<[u8; KEY_BYTES]> {
    let line = contents.strip_suffix('\n').unwrap_or(contents);
    if line.len() != KEY_HEX_CHARS || !line.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut key = [0u8; KEY_BYTES];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&line[2 * i..2 * i + 2], 16).ok()?;
    }
    Some(key)
}

fn read_key_bytes(path: &Path) -> io::Result<[u8; KEY_BYTES]> {
    let contents = std::fs::read_to_string(path)?;
    decode_hex_key(&contents).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: expected 64 hex characters", path.display()),
        )
    })
}

pub fn load_secret_key(path: &Path) -> io::Result<SecretKey> {
    let mut bytes = read_key_bytes(path)?;
    let key = SecretKey::from(bytes);
    bytes.zeroize();
    Ok(key)
}

pub fn load_public_key(path: &Path) -> io::Result<PublicKey> {
    Ok(PublicKey::from(read_key_bytes(path)?))
}

/// Derive the per-pair shared secret once at startup. Both peers compute the
/// same value from complementary key material.
pub fn precompute(ours: &SecretKey, theirs: &PublicKey) -> SalsaBox {
    SalsaBox::new(theirs, ours)
}

/// Write a key file in the on-disk format. Secret keys get mode 0600.
/// Refuses to overwrite an existing file.
pub fn write_key_file(path: &Path, key: &[u8; KEY_BYTES], secret: bool) -> io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mode = if secret { 0o600 } else { 0o644 };
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;
    let mut hex = String::with_capacity(KEY_HEX_CHARS + 1);
    for byte in key {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex.push('\n');
    file.write_all(hex.as_bytes())?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
