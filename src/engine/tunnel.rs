// TAPLINK — ENGINE: TUNNEL MODULE
// The datapath: one single-threaded readiness loop shuttling packets between
// the TAP fd and the UDP socket. The loop owns every piece of mutable state
// (shared secret, both nonces, peer address, watermarks) — no locks, no
// tasks. Within a tick, UDP ingress is drained before TAP egress, each until
// WouldBlock.

use std::fs::File;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crypto_box::SalsaBox;

use crate::cryptography::aead::{open_packet, seal_packet};
use crate::engine::protocol::{
    build_keepalive, parse_keepalive, Nonce, SizeWatermarks, BUF_BYTES, MAX_PLAINTEXT,
    MIN_FRAME_BYTES, NONCE_BYTES, WIRE_OVERHEAD,
};
use crate::engine::runtime::clock_ns;
use crate::network::tap;

/// Readiness wait ceiling. Doubles as the keepalive cadence: an idle tick
/// emits exactly one keepalive.
pub const POLL_TIMEOUT_MS: i32 = 10_000;

const REPORT_INTERVAL_NS: u64 = 1_000_000_000;

/// Connector knows its peer from configuration; the listener learns it from
/// the first authenticated datagram and follows it thereafter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Listener,
    Connector,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Counters {
    /// Decrypted frames injected into the TAP device.
    pub rx_frames: u64,
    /// Frames sealed and handed to the UDP socket.
    pub tx_frames: u64,
    pub keepalives_rx: u64,
    pub keepalives_tx: u64,
    /// Runt datagrams + replay rejections + authentication failures.
    pub drops: u64,
    /// Transient transmit failures (EMSGSIZE and friends).
    pub send_drops: u64,
}

struct Ready {
    udp: bool,
    tap: bool,
    idle: bool,
}

pub struct Tunnel {
    role: Role,
    tap: File,
    udp: UdpSocket,
    secret: SalsaBox,
    peer: Option<SocketAddr>,
    nonce_out: Nonce,
    nonce_in: Nonce,
    pub sizes: SizeWatermarks,
    pub counters: Counters,
    // Fixed staging buffers, reused every iteration. Each iteration fully
    // consumes a buffer before the next read writes into it.
    ptbuf: [u8; BUF_BYTES],
    wirebuf: [u8; BUF_BYTES],
    last_report_ns: u64,
    last_report: (Counters, SizeWatermarks),
}

impl Tunnel {
    /// `peer` is the configured destination for a connector and None for a
    /// listener. `nonce_prefix` must come from the bumped prefix file and is
    /// fixed for the life of this value.
    pub fn new(
        role: Role,
        tap: File,
        udp: UdpSocket,
        secret: SalsaBox,
        nonce_prefix: u32,
        peer: Option<SocketAddr>,
    ) -> Tunnel {
        debug_assert_eq!(role == Role::Connector, peer.is_some());
        Tunnel {
            role,
            tap,
            udp,
            secret,
            peer,
            nonce_out: Nonce::from_prefix(nonce_prefix),
            nonce_in: Nonce::ZERO,
            sizes: SizeWatermarks::default(),
            counters: Counters::default(),
            ptbuf: [0u8; BUF_BYTES],
            wirebuf: [0u8; BUF_BYTES],
            last_report_ns: 0,
            last_report: (Counters::default(), SizeWatermarks::default()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current peer endpoint: configured (connector) or learned (listener).
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Nonce of the last accepted inbound datagram.
    pub fn inbound_watermark(&self) -> Nonce {
        self.nonce_in
    }

    /// Nonce of the last originated datagram.
    pub fn outbound_nonce(&self) -> Nonce {
        self.nonce_out
    }

    /// Run until the shutdown flag is raised or a fatal runtime error
    /// surfaces. Transient per-packet faults never leave the loop.
    pub fn run(&mut self, shutdown: &AtomicBool) -> io::Result<()> {
        if self.role == Role::Connector {
            // Register with the listener straight away, before any traffic
            // needs to flow, so it learns the reverse path.
            self.send_keepalive()?;
        }

        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let ready = self.wait_ready()?;
            if ready.udp {
                self.drain_udp()?;
            }
            if ready.tap {
                self.drain_tap()?;
            }
            if ready.idle && self.peer.is_some() {
                self.send_keepalive()?;
            }
            self.report();
        }

        let c = self.counters;
        eprintln!(
            "[TAPLINK] Shutdown. RX:{} TX:{} KA:{}/{} DROP:{} SENDDROP:{}",
            c.rx_frames, c.tx_frames, c.keepalives_rx, c.keepalives_tx, c.drops, c.send_drops
        );
        Ok(())
    }

    /// Wait for readability on the UDP socket and — only once we know where
    /// to send — the TAP fd. EINTR yields an empty readiness so the loop can
    /// observe the shutdown flag; any other poll failure is fatal.
    fn wait_ready(&self) -> io::Result<Ready> {
        let mut fds = [
            libc::pollfd {
                fd: self.udp.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.tap.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let nfds = if self.peer.is_some() { 2 } else { 1 };

        // SAFETY: fds points to nfds valid pollfd structs living on this
        // stack frame.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds as libc::nfds_t, POLL_TIMEOUT_MS) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(Ready { udp: false, tap: false, idle: false });
            }
            return Err(err);
        }

        // POLLERR/POLLHUP count as ready: the pending error must be consumed
        // by the next read or the poll would spin.
        Ok(Ready {
            udp: fds[0].revents != 0,
            tap: nfds == 2 && fds[1].revents != 0,
            idle: rc == 0,
        })
    }

    /// Ingress: drain every immediately available datagram.
    pub fn drain_udp(&mut self) -> io::Result<()> {
        loop {
            let (n, src) = match self.udp.recv_from(&mut self.wirebuf) {
                Ok(v) => v,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.ingress_datagram(n, src)?;
        }
    }

    fn ingress_datagram(&mut self, n: usize, src: SocketAddr) -> io::Result<()> {
        if n < WIRE_OVERHEAD {
            self.counters.drops += 1;
            return Ok(());
        }

        let mut nonce = Nonce::ZERO;
        nonce.0.copy_from_slice(&self.wirebuf[..NONCE_BYTES]);

        // Replay/ordering: accept only nonces strictly above the watermark.
        // The comparison spans all 24 bytes, so a restarted peer (bumped
        // prefix) always passes.
        if nonce <= self.nonce_in {
            self.counters.drops += 1;
            return Ok(());
        }

        let Some(len) = open_packet(
            &self.secret,
            nonce.as_bytes(),
            &self.wirebuf[NONCE_BYTES..n],
            &mut self.ptbuf,
        ) else {
            self.counters.drops += 1;
            return Ok(());
        };

        // Only an authenticated datagram may mutate state.
        self.nonce_in = nonce;
        if self.role == Role::Listener {
            self.peer = Some(src);
        }
        self.sizes.record_rcvd(n);

        if len >= MIN_FRAME_BYTES {
            tap::write_frame(&self.tap, &self.ptbuf[..len])?;
            self.counters.rx_frames += 1;
        } else if let Some(size) = parse_keepalive(&self.ptbuf[..len]) {
            self.sizes.record_peer_report(size);
            self.counters.keepalives_rx += 1;
        }
        // Any other short payload is accepted and ignored: room for future
        // control shapes without breaking older peers.
        Ok(())
    }

    /// Egress: drain every immediately available TAP frame. No-op until the
    /// peer is known.
    pub fn drain_tap(&mut self) -> io::Result<()> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        loop {
            let n = match tap::read_frame(&self.tap, &mut self.ptbuf[..MAX_PLAINTEXT]) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.egress_frame(n, peer)?;
        }
    }

    fn egress_frame(&mut self, n: usize, peer: SocketAddr) -> io::Result<()> {
        self.nonce_out.bump();
        let total = seal_packet(
            &self.secret,
            self.nonce_out.as_bytes(),
            &self.ptbuf[..n],
            &mut self.wirebuf,
        );
        self.sizes.record_tried(total);

        match self.udp.send_to(&self.wirebuf[..total], peer) {
            Ok(_) => self.counters.tx_frames += 1,
            Err(e) if is_transient_send(&e) => {
                // The nonce is consumed either way; monotonicity holds.
                self.counters.send_drops += 1;
                eprintln!("[TAPLINK-UDP] dropped {}-byte datagram: {}", total, e);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Seal and send a 3-byte keepalive reporting our biggest_rcvd. Consumes
    /// a fresh nonce like any other datagram. No-op until the peer is known.
    pub fn send_keepalive(&mut self) -> io::Result<()> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        self.nonce_out.bump();
        let body = build_keepalive(self.sizes.biggest_rcvd);
        let total = seal_packet(
            &self.secret,
            self.nonce_out.as_bytes(),
            &body,
            &mut self.wirebuf,
        );

        match self.udp.send_to(&self.wirebuf[..total], peer) {
            Ok(_) => self.counters.keepalives_tx += 1,
            Err(e) if is_transient_send(&e) => {
                self.counters.send_drops += 1;
                eprintln!("[TAPLINK-UDP] dropped keepalive: {}", e);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Diagnostic surface: one counters line, at most once per second, only
    /// when something changed.
    fn report(&mut self) {
        let now = clock_ns();
        if now.saturating_sub(self.last_report_ns) < REPORT_INTERVAL_NS {
            return;
        }
        let snapshot = (self.counters, self.sizes);
        if snapshot == self.last_report {
            return;
        }
        self.last_report_ns = now;
        self.last_report = snapshot;
        let (c, s) = snapshot;
        eprintln!(
            "[TAPLINK] RX:{} TX:{} KA:{}/{} DROP:{} SENDDROP:{} MTU tried:{} sent:{} rcvd:{}",
            c.rx_frames,
            c.tx_frames,
            c.keepalives_rx,
            c.keepalives_tx,
            c.drops,
            c.send_drops,
            s.biggest_tried,
            s.biggest_sent,
            s.biggest_rcvd
        );
    }
}

/// Transmit failures the loop survives: path-MTU rejections, full socket
/// buffers, stray ICMP port-unreachable from a restarting peer.
fn is_transient_send(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMSGSIZE | libc::EAGAIN | libc::EINTR | libc::ENOBUFS | libc::ECONNREFUSED)
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_send_errors_survive() {
        for code in [
            libc::EMSGSIZE,
            libc::EAGAIN,
            libc::EINTR,
            libc::ENOBUFS,
            libc::ECONNREFUSED,
        ] {
            assert!(is_transient_send(&io::Error::from_raw_os_error(code)));
        }
    }

    #[test]
    fn hard_send_errors_are_fatal() {
        for code in [libc::EBADF, libc::ENOTCONN, libc::EACCES, libc::ENETUNREACH] {
            assert!(!is_transient_send(&io::Error::from_raw_os_error(code)));
        }
    }
}
