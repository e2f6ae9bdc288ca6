use std::collections::BTreeMap;

use crate::licensing::types::{LicenseError, PubkeyMap};
use crate::repo::config::VersionPubkey;

/// Cache of the trust authority's signing keys, one per license version.
///
/// The keyring only grows: a fetched map may add versions but never drop
/// one or change a key already known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerKeyring {
    keys: BTreeMap<i32, String>,
}

impl ServerKeyring {
    pub fn from_persisted(entries: &[VersionPubkey]) -> Self {
        let keys = entries
            .iter()
            .map(|entry| (entry.licversion, entry.pubkey.clone()))
            .collect();
        Self { keys }
    }

    /// Entries ordered by license version, as stored in `UCenter.ServerPubkeys`.
    pub fn to_persisted(&self) -> Vec<VersionPubkey> {
        self.keys
            .iter()
            .map(|(licversion, pubkey)| VersionPubkey {
                licversion: *licversion,
                pubkey: pubkey.clone(),
            })
            .collect()
    }

    pub fn get(&self, licversion: i32) -> Option<&str> {
        self.keys.get(&licversion).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Merge a map fetched from the authority.
    ///
    /// Rejected without modifying the keyring if the fetched map is smaller
    /// than what is already cached or rebinds a known version to another key.
    pub fn absorb(&mut self, fetched: PubkeyMap) -> Result<(), LicenseError> {
        if fetched.len() < self.keys.len() {
            return Err(LicenseError::KeyMapShrunk {
                fetched: fetched.len(),
                known: self.keys.len(),
            });
        }
        for (licversion, pubkey) in &fetched {
            if let Some(known) = self.keys.get(licversion) {
                if known != pubkey {
                    return Err(LicenseError::KeyConflict(*licversion));
                }
            }
        }
        self.keys.extend(fetched);
        Ok(())
    }
}
