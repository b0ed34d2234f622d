//! Short session keys
//!
//! A key is 8 ASCII hex digits: 6 derived from a UUIDv5 of the
//! (address, port, subsystem NQN) triple and a 2-digit probe suffix that
//! resolves collisions of the truncated hash.

use std::fmt;

use uuid::Uuid;

/// Length of a session key in bytes
pub const SESSION_KEY_LEN: usize = 8;

/// Number of suffixed variants probed per triple
pub const KEY_PROBES: usize = 256;

const KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6e766d66_2d6b_6579_8000_6e766d662d6b);

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Fixed-size lookup key of a controller session
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Derive the first key for the triple not rejected by `is_taken`
    ///
    /// Returns None once every suffixed variant is taken.
    pub fn derive(
        address: &str,
        port: u16,
        subsystem_nqn: &str,
        is_taken: impl Fn(&SessionKey) -> bool,
    ) -> Option<SessionKey> {
        let name = format!("{}:{}/{}", address, port, subsystem_nqn);
        let hash = Uuid::new_v5(&KEY_NAMESPACE, name.as_bytes());
        let base = &hash.as_bytes()[..3];

        (0..KEY_PROBES)
            .map(|probe| SessionKey::from_parts(base, probe as u8))
            .find(|key| !is_taken(key))
    }

    fn from_parts(base: &[u8], suffix: u8) -> SessionKey {
        let mut key = [0u8; SESSION_KEY_LEN];
        for (i, byte) in base.iter().chain(std::iter::once(&suffix)).enumerate() {
            key[i * 2] = HEX[(byte >> 4) as usize];
            key[i * 2 + 1] = HEX[(byte & 0x0f) as usize];
        }
        SessionKey(key)
    }

    /// Parse a key from its textual form
    pub fn parse(text: &str) -> Option<SessionKey> {
        let raw = text.as_bytes();
        if raw.len() != SESSION_KEY_LEN || !raw.iter().all(|b| HEX.contains(b)) {
            return None;
        }
        let mut key = [0u8; SESSION_KEY_LEN];
        key.copy_from_slice(raw);
        Some(SessionKey(key))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self)
    }
}
