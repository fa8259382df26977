// TAPLINK — NETWORK
// tap: attach to a preconfigured TAP device, raw frame I/O.
// udp: tunnel socket setup (role-aware bind, non-blocking, don't-fragment).

pub mod tap;
pub mod udp;
