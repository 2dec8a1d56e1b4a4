//! Per-user password derivation.
//!
//! The password is `prefix + lowercase_hex(md5(identifier))`. The prefix
//! carries the mixed-case/digit characters the warehouse's complexity policy
//! asks for; the digest only makes each user's password different. Anyone who
//! knows the scheme can recompute every password, and generate and notify
//! rely on exactly that to agree without sharing state.

use md5::{Digest, Md5};

/// Derive the password for `identifier`
pub fn derive_password(prefix: &str, identifier: &str) -> String {
    format!("{}{}", prefix, md5_hex(identifier.as_bytes()))
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
