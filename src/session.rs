use std::fmt;

use crate::{error::Error, pkcs11, slot::SlotId, token::LoginState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub pkcs11::CK_SESSION_HANDLE);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Session kind requested at open. Serial access is implied: flags without
/// `CKF_SERIAL_SESSION` never make it into a `SessionFlags`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionFlags {
    access: Access,
}

impl SessionFlags {
    pub fn read_only() -> Self {
        Self { access: Access::ReadOnly }
    }

    pub fn read_write() -> Self {
        Self { access: Access::ReadWrite }
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn bits(&self) -> pkcs11::CK_FLAGS {
        match self.access {
            Access::ReadOnly => pkcs11::CKF_SERIAL_SESSION,
            Access::ReadWrite => pkcs11::CKF_SERIAL_SESSION | pkcs11::CKF_RW_SESSION,
        }
    }
}

impl TryFrom<pkcs11::CK_FLAGS> for SessionFlags {
    type Error = Error;

    fn try_from(flags: pkcs11::CK_FLAGS) -> Result<Self, Self::Error> {
        if flags & pkcs11::CKF_SERIAL_SESSION == 0 {
            return Err(Error::ParallelNotSupported);
        }
        if flags & pkcs11::CKF_RW_SESSION == 0 {
            Ok(Self::read_only())
        } else {
            Ok(Self::read_write())
        }
    }
}

/// Roles this layer accepts for `C_Login`. `CKU_CONTEXT_SPECIFIC` and any
/// vendor value are not representable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserType {
    SecurityOfficer,
    User,
}

impl TryFrom<pkcs11::CK_USER_TYPE> for UserType {
    type Error = Error;

    fn try_from(user_type: pkcs11::CK_USER_TYPE) -> Result<Self, Self::Error> {
        match user_type {
            pkcs11::CKU_SO => Ok(UserType::SecurityOfficer),
            pkcs11::CKU_USER => Ok(UserType::User),
            _ => Err(Error::UserTypeInvalid),
        }
    }
}

/// The five session states of PKCS#11. A read-only security officer session
/// does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    PublicRO,
    PublicRW,
    UserRO,
    UserRW,
    SOFunctionsRW,
}

impl SessionState {
    /// State of a session with the given access on a slot in the given login
    /// state. Fails when a read-only session would coexist with a security
    /// officer login.
    pub fn derive(access: Access, login: LoginState) -> Result<Self, Error> {
        match (access, login) {
            (Access::ReadOnly, LoginState::LoggedOut) => Ok(SessionState::PublicRO),
            (Access::ReadWrite, LoginState::LoggedOut) => Ok(SessionState::PublicRW),
            (Access::ReadOnly, LoginState::User) => Ok(SessionState::UserRO),
            (Access::ReadWrite, LoginState::User) => Ok(SessionState::UserRW),
            (Access::ReadOnly, LoginState::SecurityOfficer) => Err(Error::ReadOnlyExists),
            (Access::ReadWrite, LoginState::SecurityOfficer) => Ok(SessionState::SOFunctionsRW),
        }
    }

    pub fn access(self) -> Access {
        match self {
            SessionState::PublicRO | SessionState::UserRO => Access::ReadOnly,
            SessionState::PublicRW | SessionState::UserRW | SessionState::SOFunctionsRW => {
                Access::ReadWrite
            }
        }
    }

    pub fn is_read_only(self) -> bool {
        self.access() == Access::ReadOnly
    }

    pub fn is_authenticated(self) -> bool {
        !matches!(self, SessionState::PublicRO | SessionState::PublicRW)
    }

    pub fn on_login(self, user: UserType) -> Result<Self, Error> {
        Self::derive(self.access(), user.into())
    }

    pub fn on_logout(self) -> Self {
        match self.access() {
            Access::ReadOnly => SessionState::PublicRO,
            Access::ReadWrite => SessionState::PublicRW,
        }
    }
}

impl From<SessionState> for pkcs11::CK_STATE {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::PublicRO => pkcs11::CKS_RO_PUBLIC_SESSION,
            SessionState::PublicRW => pkcs11::CKS_RW_PUBLIC_SESSION,
            SessionState::UserRO => pkcs11::CKS_RO_USER_FUNCTIONS,
            SessionState::UserRW => pkcs11::CKS_RW_USER_FUNCTIONS,
            SessionState::SOFunctionsRW => pkcs11::CKS_RW_SO_FUNCTIONS,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub slot_id: SlotId,
    pub flags: SessionFlags,
    pub state: SessionState,
}

impl Session {
    pub fn new(slot_id: SlotId, flags: SessionFlags, login: LoginState) -> Result<Self, Error> {
        Ok(Self {
            slot_id,
            flags,
            state: SessionState::derive(flags.access(), login)?,
        })
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            slot_id: self.slot_id,
            state: self.state,
            flags: self.flags,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub slot_id: SlotId,
    pub state: SessionState,
    pub flags: SessionFlags,
}

impl From<SessionInfo> for pkcs11::CK_SESSION_INFO {
    fn from(info: SessionInfo) -> Self {
        pkcs11::CK_SESSION_INFO {
            slotID: info.slot_id.0,
            state: info.state.into(),
            flags: info.flags.bits(),
            ulDeviceError: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_require_serial_access() {
        assert_eq!(
            SessionFlags::try_from(pkcs11::CKF_RW_SESSION),
            Err(Error::ParallelNotSupported)
        );
        assert_eq!(
            SessionFlags::try_from(pkcs11::CKF_SERIAL_SESSION),
            Ok(SessionFlags::read_only())
        );
        assert_eq!(
            SessionFlags::try_from(pkcs11::CKF_SERIAL_SESSION | pkcs11::CKF_RW_SESSION),
            Ok(SessionFlags::read_write())
        );
    }

    #[test]
    fn user_types() {
        assert_eq!(UserType::try_from(pkcs11::CKU_SO), Ok(UserType::SecurityOfficer));
        assert_eq!(UserType::try_from(pkcs11::CKU_USER), Ok(UserType::User));
        assert_eq!(UserType::try_from(pkcs11::CKU_CONTEXT_SPECIFIC), Err(Error::UserTypeInvalid));
    }

    #[test]
    fn login_pairs_each_public_state_with_its_authenticated_state() {
        assert_eq!(SessionState::PublicRO.on_login(UserType::User), Ok(SessionState::UserRO));
        assert_eq!(SessionState::PublicRW.on_login(UserType::User), Ok(SessionState::UserRW));
        assert_eq!(
            SessionState::PublicRW.on_login(UserType::SecurityOfficer),
            Ok(SessionState::SOFunctionsRW)
        );
        assert_eq!(
            SessionState::PublicRO.on_login(UserType::SecurityOfficer),
            Err(Error::ReadOnlyExists)
        );
    }

    #[test]
    fn logout_returns_to_public() {
        assert_eq!(SessionState::UserRO.on_logout(), SessionState::PublicRO);
        assert_eq!(SessionState::UserRW.on_logout(), SessionState::PublicRW);
        assert_eq!(SessionState::SOFunctionsRW.on_logout(), SessionState::PublicRW);
        assert_eq!(SessionState::PublicRO.on_logout(), SessionState::PublicRO);
    }

    #[test]
    fn session_info_converts_to_ck_session_info() {
        let session =
            Session::new(SlotId(3), SessionFlags::read_write(), LoginState::User).unwrap();
        let info: pkcs11::CK_SESSION_INFO = session.info().into();
        assert_eq!(info.slotID, 3);
        assert_eq!(info.state, pkcs11::CKS_RW_USER_FUNCTIONS);
        assert_eq!(info.flags, pkcs11::CKF_SERIAL_SESSION | pkcs11::CKF_RW_SESSION);
        assert_eq!(info.ulDeviceError, 0);
    }
}
