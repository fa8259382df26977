// TAPLINK — NETWORK: TAP MODULE
// Attach to an existing TAP interface and exchange raw Ethernet frames.
// The interface must be created and configured beforehand; attaching as an
// ordinary user cannot create one by mistake.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

const IFF_TAP: i16 = 0x0002;
const IFF_NO_PI: i16 = 0x1000;
const TUNSETIFF: u64 = 0x400454ca;

#[repr(C)]
struct ifreq_tap {
    ifr_name: [u8; libc::IFNAMSIZ],
    ifr_flags: i16,
    // Kernel copies a full struct ifreq (40 bytes); pad so it never reads
    // past our allocation.
    _pad: [u8; 22],
}

/// Attach to the named TAP interface and switch the fd to non-blocking.
pub fn attach(name: &str) -> io::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(Path::new("/dev/net/tun"))?;

    let name_bytes = name.as_bytes();
    if name_bytes.is_empty() || name_bytes.len() >= libc::IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }

    let mut req = ifreq_tap {
        ifr_name: [0; libc::IFNAMSIZ],
        ifr_flags: IFF_TAP | IFF_NO_PI,
        _pad: [0; 22],
    };
    req.ifr_name[..name_bytes.len()].copy_from_slice(name_bytes);

    // SAFETY: FFI calls with a valid fd and a pointer to a fully initialized,
    // kernel-sized ifreq.
    unsafe {
        if libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut req) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = file.as_raw_fd();
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    eprintln!("[TAPLINK-TAP] Attached to {}", name);
    Ok(file)
}

/// Read one Ethernet frame. Returns 0 when nothing is queued would end the
/// drain; WouldBlock surfaces as an io::Error for the caller to classify.
pub fn read_frame(tap: &File, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: read(2) into a valid buffer of the stated length.
    let n = unsafe {
        libc::read(
            tap.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Inject one Ethernet frame. TAP writes are all-or-nothing; a short write
/// is an error.
pub fn write_frame(tap: &File, frame: &[u8]) -> io::Result<()> {
    // SAFETY: write(2) from a valid buffer of the stated length.
    let n = unsafe {
        libc::write(
            tap.as_raw_fd(),
            frame.as_ptr() as *const libc::c_void,
            frame.len(),
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n as usize != frame.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "short write to TAP device",
        ));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::FromRawFd;

    // frame I/O is exercised against an AF_UNIX datagram socketpair — it
    // preserves message boundaries exactly like a TAP fd, and needs no
    // privileges. attach() itself requires a preconfigured device and is
    // covered by deployment, not unit tests.

    fn datagram_pair() -> (File, File) {
        let mut fds = [0i32; 2];
        // SAFETY: socketpair with a valid out-array; on success both fds are
        // owned exclusively by the returned Files.
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr())
        };
        assert_eq!(rc, 0);
        // SAFETY: Caller ensures invariants documented at module level.
        unsafe {
            for &fd in &fds {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
            (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1]))
        }
    }

    #[test]
    fn ifreq_matches_kernel_size() {
        assert_eq!(std::mem::size_of::<ifreq_tap>(), 40);
    }

    #[test]
    fn frame_roundtrip_preserves_boundaries() {
        let (a, b) = datagram_pair();
        let frame = vec![0xEEu8; 300];
        write_frame(&a, &frame).unwrap();
        let mut buf = [0u8; 2048];
        let n = read_frame(&b, &mut buf).unwrap();
        assert_eq!(&buf[..n], &frame[..]);
    }

    #[test]
    fn read_empty_is_would_block() {
        let (_a, b) = datagram_pair();
        let mut buf = [0u8; 2048];
        let err = read_frame(&b, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
