// TAPLINK — CRYPTOGRAPHY
// aead: detached seal/open of wire datagrams under the precomputed box.
// keys: hex key files and the crypto_box precomputation.

pub mod aead;
pub mod keys;
