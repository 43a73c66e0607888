//! Password-based file encryption.
//!
//! Key derivation is PBKDF2-HMAC-SHA256 over a random 16-byte salt; the
//! payload is AES-256-CBC with PKCS#7 padding and a random 16-byte IV.
//! On-disk layout: `salt(16) || iv(16) || ciphertext`. Salt and IV are
//! drawn fresh per call, so two encryptions of the same plaintext under
//! the same passphrase never produce equal output.

use std::fs;
use std::path::Path;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::BackupError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_SIZE: usize = 32; // 256 bits for AES-256
const IV_SIZE: usize = 16; // one AES block
const SALT_SIZE: usize = 16; // 128 bits of salt
const PBKDF2_ROUNDS: u32 = 10_000;

/// Smallest well-formed output: salt + IV + one padded block.
pub const MIN_CIPHERTEXT_LEN: usize = SALT_SIZE + IV_SIZE + 16;

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypts `plaintext`, returning the full `salt || iv || ciphertext` buffer.
pub fn encrypt(plaintext: &[u8], password: &str) -> Vec<u8> {
    let salt = generate_salt();
    let key = derive_key(password, &salt);
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(SALT_SIZE + IV_SIZE + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypts a `salt || iv || ciphertext` buffer.
///
/// A padding failure is reported as [`BackupError::DecryptFailed`]; with
/// CBC that is the only signal a wrong passphrase produces.
pub fn decrypt(data: &[u8], password: &str) -> Result<Vec<u8>, BackupError> {
    if data.len() < MIN_CIPHERTEXT_LEN {
        return Err(BackupError::DecryptFailed(format!(
            "input of {} bytes is shorter than the {}-byte minimum",
            data.len(),
            MIN_CIPHERTEXT_LEN
        )));
    }
    let (salt, rest) = data.split_at(SALT_SIZE);
    let (iv, ciphertext) = rest.split_at(IV_SIZE);
    if ciphertext.len() % 16 != 0 {
        return Err(BackupError::DecryptFailed("ciphertext is not block-aligned".into()));
    }

    let key = derive_key(password, salt);
    let iv: [u8; IV_SIZE] = iv.try_into().expect("split guarantees the IV width");
    Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| BackupError::DecryptFailed("bad padding (wrong password?)".into()))
}

/// Encrypts `input` into `output`.
pub fn encrypt_file(input: &Path, output: &Path, password: &str) -> Result<(), BackupError> {
    let plaintext = fs::read(input).map_err(|e| BackupError::io(e, input))?;
    let sealed = encrypt(&plaintext, password);
    fs::write(output, sealed).map_err(|e| BackupError::io(e, output))?;
    Ok(())
}

/// Decrypts `input` into `output`. Fails without touching `output` when the
/// passphrase does not match.
pub fn decrypt_file(input: &Path, output: &Path, password: &str) -> Result<(), BackupError> {
    let data = fs::read(input).map_err(|e| BackupError::io(e, input))?;
    let plaintext = decrypt(&data, password)?;
    fs::write(output, plaintext).map_err(|e| BackupError::io(e, output))?;
    Ok(())
}
