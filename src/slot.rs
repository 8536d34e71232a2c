use std::{fmt, sync::Arc};

use slab::Slab;

use crate::{config::SlotConfig, error::Error, pkcs11, token::SoftToken, token::Token};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub pkcs11::CK_SLOT_ID);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Slot {
    pub id: SlotId,
    pub label: String,
    pub token: Option<Arc<dyn Token>>,
}

impl Slot {
    pub fn new(id: SlotId, label: impl Into<String>, token: Option<Arc<dyn Token>>) -> Self {
        Self {
            id,
            label: label.into(),
            token,
        }
    }
}

/// Fixed set of slots known to the provider. Slot ids are 1-based; slab key
/// `n` holds slot `n + 1`.
pub struct SlotDirectory {
    slots: Slab<Slot>,
}

impl SlotDirectory {
    pub fn new(tokens: impl IntoIterator<Item = (String, Option<Arc<dyn Token>>)>) -> Self {
        let mut slots = Slab::new();
        for (label, token) in tokens {
            let entry = slots.vacant_entry();
            let id = SlotId(entry.key() as pkcs11::CK_SLOT_ID + 1);
            entry.insert(Slot::new(id, label, token));
        }
        Self { slots }
    }

    pub fn from_config(slots: &[SlotConfig]) -> Self {
        Self::new(slots.iter().map(|slot| {
            let token = slot
                .token
                .as_ref()
                .map(|token| Arc::new(SoftToken::from(token)) as Arc<dyn Token>);
            (slot.label.clone(), token)
        }))
    }

    pub fn get(&self, slot_id: SlotId) -> Option<&Slot> {
        let key = usize::try_from(slot_id.0).ok()?.checked_sub(1)?;
        self.slots.get(key)
    }

    /// Resolves a slot to its token, failing with `SlotIdInvalid` for an
    /// unknown slot and `TokenNotPresent` for an empty one.
    pub fn resolve(&self, slot_id: SlotId) -> Result<Arc<dyn Token>, Error> {
        let slot = self.get(slot_id).ok_or(Error::SlotIdInvalid)?;
        slot.token.clone().ok_or(Error::TokenNotPresent)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn slots_are_numbered_from_one() {
        let directory = SlotDirectory::new([
            ("a".to_string(), None),
            ("b".to_string(), Some(Arc::new(SoftToken::new("b", None, None)) as Arc<dyn Token>)),
        ]);

        assert_eq!(directory.get(SlotId(1)).unwrap().id, SlotId(1));
        assert_eq!(directory.get(SlotId(2)).unwrap().id, SlotId(2));
        assert_eq!(directory.get(SlotId(2)).unwrap().label, "b");
        assert!(directory.get(SlotId(0)).is_none());
    }

    #[test]
    fn resolve_distinguishes_missing_slot_and_missing_token() {
        let directory = SlotDirectory::new([
            ("empty".to_string(), None),
            (
                "full".to_string(),
                Some(Arc::new(SoftToken::new("full", None, None)) as Arc<dyn Token>),
            ),
        ]);

        assert_eq!(directory.resolve(SlotId(1)).err(), Some(Error::TokenNotPresent));
        assert!(directory.resolve(SlotId(2)).is_ok());
        assert_eq!(directory.resolve(SlotId(3)).err(), Some(Error::SlotIdInvalid));
    }

    #[test]
    fn default_config_has_one_slot_with_token() {
        let directory = SlotDirectory::from_config(&Config::default().slots);
        assert_eq!(directory.len(), 1);
        assert!(directory.resolve(SlotId(1)).is_ok());
    }
}
