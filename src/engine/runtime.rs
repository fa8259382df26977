// TAPLINK — ENGINE: RUNTIME MODULE
// Infrastructure that supports the engine but isn't the protocol itself:
// fatal exit diagnostics, shutdown signals, monotonic clock, and the
// persistent nonce-prefix file.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// FATAL EXIT + DIAGNOSTIC ERROR CODES
// ============================================================================

// Convention: 0x10-0x1F = Boot, 0x20-0x2F = Runtime, 0x30-0x3F = Transport

// Boot failures (engine refuses to start)
pub const E_RUN_AS_ROOT: i32 = 0x10;
pub const E_TAP_ATTACH: i32 = 0x11;
pub const E_KEY_FILE: i32 = 0x12;
pub const E_BAD_ADDRESS: i32 = 0x13;
pub const E_NONCE_PREFIX: i32 = 0x14;

// Runtime failures (loop exits)
pub const E_LOOP_FAILED: i32 = 0x20;

// Transport failures
pub const E_SOCKET: i32 = 0x30;

/// Structured fatal exit. No heap allocation, no unwinding, no formatting.
/// Writes a fixed-format line to stderr via a single writev, then exits.
/// Output: "[TAPLINK FATAL 0xHH] msg\n"
#[inline(never)]
pub fn fatal(code: i32, msg: &str) -> ! {
    let prefix = b"[TAPLINK FATAL 0x";
    let hex = [
        b"0123456789ABCDEF"[((code >> 4) & 0xF) as usize],
        b"0123456789ABCDEF"[(code & 0xF) as usize],
    ];
    let suffix = b"] ";
    let newline = b"\n";
    let iov = [
        libc::iovec { iov_base: prefix.as_ptr() as *mut _, iov_len: prefix.len() },
        libc::iovec { iov_base: hex.as_ptr() as *mut _, iov_len: 2 },
        libc::iovec { iov_base: suffix.as_ptr() as *mut _, iov_len: suffix.len() },
        libc::iovec { iov_base: msg.as_ptr() as *mut _, iov_len: msg.len() },
        libc::iovec { iov_base: newline.as_ptr() as *mut _, iov_len: 1 },
    ];
    // SAFETY: writev(2, iov, 5) writes to stderr (fd 2, always open). All iov
    // entries point to live byte arrays with correct lengths.
    unsafe {
        libc::writev(2, iov.as_ptr(), 5);
    }
    std::process::exit(code);
}

// ============================================================================
// SHUTDOWN SIGNALS
// ============================================================================

pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: i32) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Install SIGINT/SIGTERM handlers that raise the shutdown flag. The loop
/// observes the flag at the top of every tick; poll returns EINTR immediately
/// on signal delivery, so shutdown is never delayed by the 10-second wait.
pub fn install_signal_handlers() {
    // SAFETY: signal_handler is async-signal-safe (a single relaxed store).
    unsafe {
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
    }
}

// ============================================================================
// MONOTONIC CLOCK
// ============================================================================

#[inline(always)]
pub fn clock_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: FFI call with valid mutable reference to timespec.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

// ============================================================================
// NONCE-PREFIX FILE
// ============================================================================

/// Read the 4-byte big-endian counter from `path`, increment it, write it
/// back, and return the incremented value. The file must be durable before
/// the value is used: a reused prefix would repeat nonces under a long-term
/// key. Prefix 0 is reserved for error/uninitialized and is refused, which
/// also catches u32 wraparound.
pub fn bump_nonce_prefix(path: &Path) -> io::Result<u32> {
    let raw = std::fs::read(path)?;
    if raw.len() != 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("nonce-prefix file is {} bytes, expected 4", raw.len()),
        ));
    }
    let stored = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let prefix = stored.wrapping_add(1);
    if prefix == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "nonce-prefix counter exhausted (would wrap to reserved value 0)",
        ));
    }

    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    file.write_all(&prefix.to_be_bytes())?;
    file.sync_all()?;
    Ok(prefix)
}

// ============================================================================
// TESTS
// ============================================================================
