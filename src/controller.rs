//! Session and login orchestration.
//!
//! [`SessionController`] validates caller input, resolves slots and tokens and
//! drives the token and the registry together. Work on one slot is serialized
//! by that slot's lock, which is held across the token call and the matching
//! registry update. Lock order is slot lock, then registry lock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    config::Config,
    error::Error,
    pin::Pin,
    pkcs11,
    registry::SessionRegistry,
    session::{SessionFlags, SessionHandle, SessionInfo, UserType},
    slot::{SlotDirectory, SlotId},
    token::Token,
};

pub struct SessionController {
    slots: SlotDirectory,
    registry: SessionRegistry,
    slot_locks: DashMap<SlotId, Arc<Mutex<()>>>,
    min_pin_len: usize,
    max_pin_len: usize,
}

impl SessionController {
    pub fn new(
        slots: SlotDirectory,
        registry: SessionRegistry,
        min_pin_len: usize,
        max_pin_len: usize,
    ) -> Self {
        Self {
            slots,
            registry,
            slot_locks: DashMap::new(),
            min_pin_len,
            max_pin_len,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SlotDirectory::from_config(&config.slots),
            SessionRegistry::new(config.max_sessions),
            config.min_pin_len,
            config.max_pin_len,
        )
    }

    pub fn slots(&self) -> &SlotDirectory {
        &self.slots
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn slot_lock(&self, slot_id: SlotId) -> Arc<Mutex<()>> {
        self.slot_locks.entry(slot_id).or_default().clone()
    }

    pub fn open_session(
        &self,
        slot_id: SlotId,
        flags: pkcs11::CK_FLAGS,
    ) -> Result<SessionHandle, Error> {
        self.slots.resolve(slot_id)?;
        let flags = SessionFlags::try_from(flags)?;

        let lock = self.slot_lock(slot_id);
        let _guard = lock.lock();

        let handle = self.registry.create_session(slot_id, flags)?;
        info!("opened session {} on slot {} ({:?})", handle, slot_id, flags.access());
        Ok(handle)
    }

    pub fn close_session(&self, handle: SessionHandle) -> Result<(), Error> {
        let slot_id = self.registry.slot_id(handle)?;
        let token = self.slots.resolve(slot_id)?;

        let lock = self.slot_lock(slot_id);
        let _guard = lock.lock();

        if self.registry.logout_required(slot_id, Some(handle)) {
            if let Err(err) = self.logout_slot(slot_id, token.as_ref()) {
                warn!("forced logout before closing session {} failed: {}", handle, err);
                return Err(Error::Failed);
            }
        }

        if !self.registry.close_session(handle) {
            return Err(Error::Closed);
        }

        info!("closed session {} on slot {}", handle, slot_id);
        Ok(())
    }

    pub fn close_all_sessions(&self, slot_id: SlotId) -> Result<(), Error> {
        let token = self.slots.resolve(slot_id)?;

        let lock = self.slot_lock(slot_id);
        let _guard = lock.lock();

        if self.registry.logout_required(slot_id, None) {
            self.logout_slot(slot_id, token.as_ref())?;
        }

        let closed = self.registry.close_all_sessions(slot_id);
        info!("closed {} session(s) on slot {}", closed, slot_id);
        Ok(())
    }

    pub fn session_info(&self, handle: SessionHandle) -> Result<SessionInfo, Error> {
        self.registry.session_info(handle)
    }

    /// Checks a credential length against the configured bounds. Callers
    /// holding a raw PIN buffer run this before copying from it.
    pub fn check_pin_len(&self, len: pkcs11::CK_ULONG) -> Result<(), Error> {
        match usize::try_from(len) {
            Ok(len) if (self.min_pin_len..=self.max_pin_len).contains(&len) => Ok(()),
            _ => Err(Error::PinLenRange),
        }
    }

    pub fn login(
        &self,
        handle: SessionHandle,
        user_type: pkcs11::CK_USER_TYPE,
        pin: Option<&Pin>,
    ) -> Result<(), Error> {
        let pin = pin.ok_or(Error::ArgumentsBad)?;
        self.check_pin_len(pin.len() as pkcs11::CK_ULONG)?;

        let slot_id = self.registry.slot_id(handle)?;
        let token = self.resolve_for_session(slot_id)?;

        let lock = self.slot_lock(slot_id);
        let _guard = lock.lock();

        // The session may have been closed while waiting for the slot.
        if !self.registry.find(handle) {
            return Err(Error::InvalidHandle);
        }

        if user_type == pkcs11::CKU_SO && self.registry.read_only_session_exists(slot_id) {
            return Err(Error::ReadOnlyExists);
        }

        let user = UserType::try_from(user_type)?;
        token.login(pin, user)?;

        if let Err(err) = self.registry.apply_login(slot_id, user) {
            if let Err(logout_err) = token.logout() {
                warn!("rolling back login on slot {} failed: {}", slot_id, logout_err);
            }
            return Err(err);
        }

        info!("slot {} logged in as {:?} via session {}", slot_id, user, handle);
        Ok(())
    }

    pub fn logout(&self, handle: SessionHandle) -> Result<(), Error> {
        let slot_id = self.registry.slot_id(handle)?;
        let token = self.resolve_for_session(slot_id)?;

        let lock = self.slot_lock(slot_id);
        let _guard = lock.lock();

        if !self.registry.find(handle) {
            return Err(Error::InvalidHandle);
        }

        self.logout_slot(slot_id, token.as_ref())
    }

    /// Closes every session of every slot, logging tokens out first.
    pub fn finalize(&self) -> Result<(), Error> {
        let mut result = Ok(());
        for slot_id in self.registry.active_slots() {
            if let Err(err) = self.close_all_sessions(slot_id) {
                warn!("closing sessions of slot {} during finalize failed: {}", slot_id, err);
                result = result.and(Err(err));
            }
        }
        result
    }

    /// Callers must hold the slot lock.
    fn logout_slot(&self, slot_id: SlotId, token: &dyn Token) -> Result<(), Error> {
        token.logout()?;
        self.registry.apply_logout(slot_id);
        info!("slot {} logged out", slot_id);
        Ok(())
    }

    /// Slot resolution for a session that already exists: an unknown slot
    /// means the handle no longer refers to anything valid.
    fn resolve_for_session(&self, slot_id: SlotId) -> Result<Arc<dyn Token>, Error> {
        self.slots.resolve(slot_id).map_err(|err| match err {
            Error::SlotIdInvalid => Error::InvalidHandle,
            other => other,
        })
    }
}
