use std::fs::OpenOptions;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use russh::keys::signature::rand_core::OsRng;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg, PrivateKey};

pub struct Keys {
    pub ed25519: PrivateKey,
    pub rsa: PrivateKey,
    pub ecdsa: PrivateKey,
}

/// Load the host keys from `key_dir`, generating and persisting any that are
/// missing. Unreadable or corrupt key files degrade to ephemeral keys rather
/// than refusing to start; a honeypot that is down catches nothing.
pub fn load_or_generate_keys(key_dir: &Path) -> Keys {
    if let Err(err) = std::fs::create_dir_all(key_dir) {
        log::warn!(
            "cannot create key directory {}: {err}; keys will be ephemeral",
            key_dir.display()
        );
    }

    Keys {
        ed25519: load_or_create_key(key_dir.join("ed25519"), Algorithm::Ed25519),
        rsa: load_or_create_key(
            key_dir.join("rsa"),
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
        ),
        ecdsa: load_or_create_key(
            key_dir.join("ecdsa"),
            Algorithm::Ecdsa {
                curve: EcdsaCurve::NistP256,
            },
        ),
    }
}

fn load_or_create_key(key_file_path: PathBuf, algorithm: Algorithm) -> PrivateKey {
    log::debug!(
        "loading {algorithm} key from {}",
        key_file_path.display()
    );
    match OpenOptions::new().read(true).open(&key_file_path) {
        Ok(mut keyfile) => {
            let mut buffer = Vec::new();
            match keyfile.read_to_end(&mut buffer) {
                Ok(0) => {
                    log::warn!("key file {} is empty", key_file_path.display());
                    generate_and_store(key_file_path, algorithm)
                }
                Ok(_) => match PrivateKey::from_bytes(buffer.as_slice()) {
                    Ok(key) => key,
                    Err(err) => {
                        log::warn!("unreadable key file: {err}; using an ephemeral key");
                        generate(algorithm)
                    }
                },
                Err(err) => {
                    log::warn!("failed to read key file: {err}; using an ephemeral key");
                    generate(algorithm)
                }
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            generate_and_store(key_file_path, algorithm)
        }
        Err(err) => {
            log::warn!("cannot open key file: {err}; using an ephemeral key");
            generate(algorithm)
        }
    }
}

fn generate(algorithm: Algorithm) -> PrivateKey {
    PrivateKey::random(&mut OsRng, algorithm).expect("host key generation cannot fail")
}

fn generate_and_store(key_file_path: PathBuf, algorithm: Algorithm) -> PrivateKey {
    let key = generate(algorithm);
    match key.to_bytes() {
        Ok(bytes) => {
            if let Err(err) = std::fs::write(&key_file_path, bytes) {
                log::warn!(
                    "failed to persist key to {}: {err}",
                    key_file_path.display()
                );
            }
        }
        Err(err) => log::warn!("failed to serialize generated key: {err}"),
    }
    key
}
