// TAPLINK — Orchestrator
// Argument parsing, startup checks, and the hand-off into the tunnel loop.
// All arguments are positional; the only flag is a leading -l selecting the
// listener role.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use taplink::cryptography::keys;
use taplink::engine::runtime::{
    self, fatal, E_BAD_ADDRESS, E_KEY_FILE, E_LOOP_FAILED, E_NONCE_PREFIX, E_RUN_AS_ROOT,
    E_SOCKET, E_TAP_ATTACH,
};
use taplink::engine::tunnel::{Role, Tunnel};
use taplink::network::{tap, udp};

const USAGE: &str =
    "Usage: taplink [-l] <iface> <our-secret-key> <address> <port> <peer-public-key> <nonce-file>";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Optional leading -l: listen on the given address:port instead of
    // connecting to it.
    let mut n = 1;
    let listen = args.get(n).map(|a| a == "-l").unwrap_or(false);
    if listen {
        n += 1;
    }
    if args.len() != n + 6 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    // The TAP device is preconfigured by an administrator; attaching needs no
    // privileges, and running privileged must not create one by mistake.
    // SAFETY: geteuid has no preconditions.
    if unsafe { libc::geteuid() } == 0 {
        fatal(E_RUN_AS_ROOT, "taplink must run as an ordinary user");
    }

    let iface = &args[n];
    let our_key_path = Path::new(&args[n + 1]);
    let addr_arg = &args[n + 2];
    let port_arg = &args[n + 3];
    let peer_key_path = Path::new(&args[n + 4]);
    let prefix_path = Path::new(&args[n + 5]);

    let tap_file = match tap::attach(iface) {
        Ok(f) => f,
        Err(e) => fatal(E_TAP_ATTACH, &format!("cannot attach {}: {}", iface, e)),
    };

    let our_sk = match keys::load_secret_key(our_key_path) {
        Ok(k) => k,
        Err(e) => fatal(E_KEY_FILE, &format!("secret key: {}", e)),
    };
    let their_pk = match keys::load_public_key(peer_key_path) {
        Ok(k) => k,
        Err(e) => fatal(E_KEY_FILE, &format!("peer public key: {}", e)),
    };

    // Address must be a textual IPv4/IPv6 address, never a hostname.
    let ip: IpAddr = match addr_arg.parse() {
        Ok(ip) => ip,
        Err(_) => fatal(E_BAD_ADDRESS, "address must be a literal IPv4 or IPv6 address"),
    };
    let port: u16 = match port_arg.parse() {
        Ok(p) if (1..=65534).contains(&p) => p,
        _ => fatal(E_BAD_ADDRESS, "port must be in 1..65534"),
    };
    let addr = SocketAddr::new(ip, port);

    let nonce_prefix = match runtime::bump_nonce_prefix(prefix_path) {
        Ok(p) => p,
        Err(e) => fatal(
            E_NONCE_PREFIX,
            &format!("{}: {}", prefix_path.display(), e),
        ),
    };

    let sock = match udp::open_socket(listen, addr) {
        Ok(s) => s,
        Err(e) => fatal(E_SOCKET, &format!("socket {}: {}", addr, e)),
    };

    let secret = keys::precompute(&our_sk, &their_pk);
    runtime::install_signal_handlers();

    let (role, peer) = if listen {
        (Role::Listener, None)
    } else {
        (Role::Connector, Some(addr))
    };
    eprintln!(
        "[TAPLINK] {} on {} <-> {} (nonce prefix {})",
        if listen { "listening" } else { "connecting" },
        iface,
        addr,
        nonce_prefix
    );

    let mut tunnel = Tunnel::new(role, tap_file, sock, secret, nonce_prefix, peer);
    if let Err(e) = tunnel.run(&runtime::SHUTDOWN) {
        fatal(E_LOOP_FAILED, &format!("datapath failed: {}", e));
    }
}
