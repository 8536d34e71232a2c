//! The table of live sessions.
//!
//! Every operation runs under one registry-wide lock, so capacity checks,
//! handle allocation and slot-wide state transitions are each a single
//! critical section. The registry also caches the login state of every slot
//! that has sessions; the token stays authoritative and the controller keeps
//! the two in step.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{
    error::Error,
    pkcs11,
    session::{Access, Session, SessionFlags, SessionHandle, SessionInfo, SessionState, UserType},
    slot::SlotId,
    token::LoginState,
};

struct Inner {
    sessions: HashMap<SessionHandle, Session>,
    logins: HashMap<SlotId, LoginState>,
    next_handle: pkcs11::CK_SESSION_HANDLE,
}

impl Inner {
    fn login_state(&self, slot_id: SlotId) -> LoginState {
        self.logins.get(&slot_id).copied().unwrap_or_default()
    }

    fn on_slot(&self, slot_id: SlotId) -> impl Iterator<Item = (&SessionHandle, &Session)> {
        self.sessions.iter().filter(move |(_, session)| session.slot_id == slot_id)
    }
}

pub struct SessionRegistry {
    max_sessions: usize,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                logins: HashMap::new(),
                // Zero is CK_INVALID_HANDLE.
                next_handle: 1,
            }),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Allocates a handle for a new session on `slot_id`. The session starts
    /// in the state implied by `flags` and the slot's current login.
    pub fn create_session(
        &self,
        slot_id: SlotId,
        flags: SessionFlags,
    ) -> Result<SessionHandle, Error> {
        let mut inner = self.inner.lock();

        if inner.sessions.len() >= self.max_sessions {
            return Err(Error::SessionCount);
        }

        let login = inner.login_state(slot_id);
        if flags.access() == Access::ReadOnly && login == LoginState::SecurityOfficer {
            return Err(Error::SessionReadWriteSoExists);
        }
        let session = Session::new(slot_id, flags, login)?;

        let handle = SessionHandle(inner.next_handle);
        inner.next_handle = inner.next_handle.checked_add(1).ok_or(Error::Failed)?;
        inner.sessions.insert(handle, session);

        Ok(handle)
    }

    pub fn find(&self, handle: SessionHandle) -> bool {
        self.inner.lock().sessions.contains_key(&handle)
    }

    pub fn slot_id(&self, handle: SessionHandle) -> Result<SlotId, Error> {
        self.inner
            .lock()
            .sessions
            .get(&handle)
            .map(|session| session.slot_id)
            .ok_or(Error::InvalidHandle)
    }

    pub fn session_state_exists(&self, slot_id: SlotId, state: SessionState) -> bool {
        self.inner.lock().on_slot(slot_id).any(|(_, session)| session.state == state)
    }

    pub fn read_only_session_exists(&self, slot_id: SlotId) -> bool {
        self.inner
            .lock()
            .on_slot(slot_id)
            .any(|(_, session)| session.state.is_read_only())
    }

    /// Whether removing `handle` (or, with `None`, every session of the slot)
    /// requires the slot's token to be logged out first.
    pub fn logout_required(&self, slot_id: SlotId, handle: Option<SessionHandle>) -> bool {
        let inner = self.inner.lock();
        let logged_in = inner.login_state(slot_id) != LoginState::LoggedOut;

        match handle {
            Some(handle) => {
                let Some(session) = inner.sessions.get(&handle) else {
                    return false;
                };
                if session.slot_id != slot_id {
                    return false;
                }
                let others_remain = inner.on_slot(slot_id).any(|(other, _)| *other != handle);
                (logged_in || session.state.is_authenticated()) && !others_remain
            }
            None => {
                logged_in
                    || inner.on_slot(slot_id).any(|(_, session)| session.state.is_authenticated())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn login_state(&self, slot_id: SlotId) -> LoginState {
        self.inner.lock().login_state(slot_id)
    }

    /// Moves every session of the slot into the authenticated state for
    /// `user`. Either all sessions change or none do.
    pub fn apply_login(&self, slot_id: SlotId, user: UserType) -> Result<(), Error> {
        let mut inner = self.inner.lock();

        let transitions = inner
            .on_slot(slot_id)
            .map(|(handle, session)| session.state.on_login(user).map(|state| (*handle, state)))
            .collect::<Result<Vec<_>, Error>>()?;

        for (handle, state) in transitions {
            if let Some(session) = inner.sessions.get_mut(&handle) {
                session.state = state;
            }
        }
        inner.logins.insert(slot_id, user.into());

        Ok(())
    }

    /// Returns every session of the slot to its public state.
    pub fn apply_logout(&self, slot_id: SlotId) {
        let mut inner = self.inner.lock();

        for session in inner.sessions.values_mut().filter(|session| session.slot_id == slot_id) {
            session.state = session.state.on_logout();
        }
        inner.logins.remove(&slot_id);
    }

    /// Removes one session. Returns `false` when the handle is not live.
    pub fn close_session(&self, handle: SessionHandle) -> bool {
        let mut inner = self.inner.lock();

        let Some(session) = inner.sessions.remove(&handle) else {
            return false;
        };
        if inner.on_slot(session.slot_id).next().is_none() {
            inner.logins.remove(&session.slot_id);
        }
        true
    }

    /// Removes every session of the slot and returns how many were removed.
    pub fn close_all_sessions(&self, slot_id: SlotId) -> usize {
        let mut inner = self.inner.lock();

        let before = inner.sessions.len();
        inner.sessions.retain(|_, session| session.slot_id != slot_id);
        inner.logins.remove(&slot_id);
        before - inner.sessions.len()
    }

    pub fn session_info(&self, handle: SessionHandle) -> Result<SessionInfo, Error> {
        self.inner
            .lock()
            .sessions
            .get(&handle)
            .map(Session::info)
            .ok_or(Error::InvalidHandle)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    #[cfg(test)]
    pub(crate) fn count_on(&self, slot_id: SlotId) -> usize {
        self.inner.lock().on_slot(slot_id).count()
    }

    /// Slots that currently have at least one session, in ascending order.
    pub fn active_slots(&self) -> Vec<SlotId> {
        let inner = self.inner.lock();
        let mut slots: Vec<_> = inner.sessions.values().map(|session| session.slot_id).collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }
}
