// TAPLINK — CRATE ROOT (LIBRARY)
// Encrypted Ethernet-over-UDP tunnel between two statically keyed peers.
//
// Module hierarchy:
//   engine/protocol  — Wire format, nonce discipline, keepalive codec, size watermarks
//   engine/runtime   — Fatal exit, shutdown signals, clock, nonce-prefix persistence
//   engine/tunnel    — The datapath loop: poll tick, ingress, egress, keepalives
//   cryptography/    — NaCl crypto_box precomputation + detached seal/open
//   network/         — TAP attach and frame I/O, UDP socket setup (DF bit)

pub mod cryptography;
pub mod engine;
pub mod network;
