use bpg_common::Secret;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Calculates the base64-encoded HMAC-SHA256 signature of `data` under `secret`. Gateways sign webhook bodies this
/// way; the value they send must match this calculation byte for byte.
pub fn calculate_hmac(secret: &Secret<String>, data: &[u8]) -> String {
    let key = secret.reveal().as_bytes();
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    base64::encode(mac.finalize().into_bytes())
}
