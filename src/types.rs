use std::fmt::{self, Debug, Display};

use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Raw per-role disk encryption key. Produced by an external key
/// generation step, consumed exactly once when provisioning the target,
/// and wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop, Clone)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn random() -> Self {
        let mut key = vec![0u8; ENCRYPTION_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }
}

impl From<Vec<u8>> for EncryptionKey {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

// Key material must never end up in logs.
impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey({} bytes)", self.0.len())
    }
}

/// Encryption container variant selected for the target device.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionType {
    #[default]
    None,
    Luks,
    LuksWithIce,
}

impl EncryptionType {
    pub fn is_none(self) -> bool {
        self == EncryptionType::None
    }
}

impl Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionType::None => write!(f, "none"),
            EncryptionType::Luks => write!(f, "luks"),
            EncryptionType::LuksWithIce => write!(f, "luks-with-ice"),
        }
    }
}
