// TAPLINK — NETWORK: UDP MODULE
// Tunnel socket setup. The listener binds the configured address; the
// connector binds an ephemeral port of the matching family. Both run
// non-blocking with don't-fragment set, so path-MTU problems surface as
// EMSGSIZE on send instead of silent IP fragmentation.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;

// Not exported by the libc crate.
const IPV6_MTU_DISCOVER: libc::c_int = 23;
const IPV6_PMTUDISC_DO: libc::c_int = 2;

/// Create the tunnel socket. `listen` binds `addr` itself; otherwise the
/// socket is bound to the unspecified address of the same family and `addr`
/// is only ever used as a send destination.
pub fn open_socket(listen: bool, addr: SocketAddr) -> io::Result<UdpSocket> {
    let sock = if listen {
        UdpSocket::bind(addr)?
    } else {
        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        UdpSocket::bind(local)?
    };
    sock.set_nonblocking(true)?;
    set_dont_fragment(&sock, addr.is_ipv6())?;
    Ok(sock)
}

fn set_dont_fragment(sock: &UdpSocket, v6: bool) -> io::Result<()> {
    let fd = sock.as_raw_fd();
    let (level, opt, val) = if v6 {
        (libc::IPPROTO_IPV6, IPV6_MTU_DISCOVER, IPV6_PMTUDISC_DO)
    } else {
        (libc::IPPROTO_IP, libc::IP_MTU_DISCOVER, libc::IP_PMTUDISC_DO)
    };
    // SAFETY: setsockopt with a valid fd and a c_int-sized option value.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_binds_configured_address() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let sock = open_socket(true, addr).unwrap();
        let local = sock.local_addr().unwrap();
        assert!(local.ip().is_loopback());
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn connector_binds_ephemeral() {
        let addr: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        let sock = open_socket(false, addr).unwrap();
        let local = sock.local_addr().unwrap();
        assert!(local.is_ipv4());
        assert_ne!(local.port(), 7001);
    }

    #[test]
    fn socket_is_nonblocking() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let sock = open_socket(true, addr).unwrap();
        let mut buf = [0u8; 16];
        let err = sock.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn dont_fragment_is_set() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let sock = open_socket(true, addr).unwrap();

        let mut val: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: getsockopt with a valid fd and correctly sized out-params.
        let rc = unsafe {
            libc::getsockopt(
                sock.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_MTU_DISCOVER,
                &mut val as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        assert_eq!(rc, 0);
        assert_eq!(val, libc::IP_PMTUDISC_DO);
    }
}
