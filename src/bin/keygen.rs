// TAPLINK-KEYGEN — long-term X25519 keypair generation
// Writes both halves in the key-file format taplink consumes: 64 hex chars
// plus newline. The secret key file is created 0600; neither file is ever
// overwritten.

use std::path::Path;

use crypto_box::SecretKey;
use rand::rngs::OsRng;

use taplink::cryptography::keys;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: taplink-keygen <secret-key-file> <public-key-file>");
        std::process::exit(1);
    }
    let secret_path = Path::new(&args[1]);
    let public_path = Path::new(&args[2]);

    let sk = SecretKey::generate(&mut OsRng);
    let pk = sk.public_key();

    if let Err(e) = keys::write_key_file(secret_path, &sk.to_bytes(), true) {
        eprintln!("[TAPLINK-KEYGEN] {}: {}", secret_path.display(), e);
        std::process::exit(1);
    }
    if let Err(e) = keys::write_key_file(public_path, pk.as_bytes(), false) {
        eprintln!("[TAPLINK-KEYGEN] {}: {}", public_path.display(), e);
        std::process::exit(1);
    }

    eprintln!(
        "[TAPLINK-KEYGEN] wrote {} (secret, 0600) and {}",
        secret_path.display(),
        public_path.display()
    );
}
