//! Error kinds surfaced by the session layer and their `CKR_*` translation.

use thiserror::Error;

use crate::pkcs11;

/// Errors raised by the session layer prior to translation into `CKR_*`
/// return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("cryptoki not initialized")]
    NotInitialized,
    #[error("cryptoki already initialized")]
    AlreadyInitialized,
    #[error("bad arguments")]
    ArgumentsBad,
    #[error("slot id invalid")]
    SlotIdInvalid,
    #[error("token not present")]
    TokenNotPresent,
    #[error("parallel sessions are not supported")]
    ParallelNotSupported,
    #[error("maximum session count reached")]
    SessionCount,
    #[error("session handle invalid")]
    InvalidHandle,
    #[error("session closed")]
    Closed,
    #[error("pin length out of range")]
    PinLenRange,
    #[error("a read-only session exists")]
    ReadOnlyExists,
    #[error("a read-write security officer session exists")]
    SessionReadWriteSoExists,
    #[error("user type invalid")]
    UserTypeInvalid,
    #[error("pin incorrect")]
    PinIncorrect,
    #[error("pin locked")]
    PinLocked,
    #[error("user already logged in")]
    UserAlreadyLoggedIn,
    #[error("another user already logged in")]
    UserAnotherAlreadyLoggedIn,
    #[error("user not logged in")]
    UserNotLoggedIn,
    #[error("user pin not initialized")]
    UserPinNotInitialized,
    #[error("device error")]
    DeviceError,
    #[error("function failed")]
    Failed,
}

impl Error {
    pub fn rv(self) -> pkcs11::CK_RV {
        match self {
            Error::NotInitialized => pkcs11::CKR_CRYPTOKI_NOT_INITIALIZED,
            Error::AlreadyInitialized => pkcs11::CKR_CRYPTOKI_ALREADY_INITIALIZED,
            Error::ArgumentsBad => pkcs11::CKR_ARGUMENTS_BAD,
            Error::SlotIdInvalid => pkcs11::CKR_SLOT_ID_INVALID,
            Error::TokenNotPresent => pkcs11::CKR_TOKEN_NOT_PRESENT,
            Error::ParallelNotSupported => pkcs11::CKR_SESSION_PARALLEL_NOT_SUPPORTED,
            Error::SessionCount => pkcs11::CKR_SESSION_COUNT,
            Error::InvalidHandle => pkcs11::CKR_SESSION_HANDLE_INVALID,
            Error::Closed => pkcs11::CKR_SESSION_CLOSED,
            Error::PinLenRange => pkcs11::CKR_PIN_LEN_RANGE,
            Error::ReadOnlyExists => pkcs11::CKR_SESSION_READ_ONLY_EXISTS,
            Error::SessionReadWriteSoExists => pkcs11::CKR_SESSION_READ_WRITE_SO_EXISTS,
            Error::UserTypeInvalid => pkcs11::CKR_USER_TYPE_INVALID,
            Error::PinIncorrect => pkcs11::CKR_PIN_INCORRECT,
            Error::PinLocked => pkcs11::CKR_PIN_LOCKED,
            Error::UserAlreadyLoggedIn => pkcs11::CKR_USER_ALREADY_LOGGED_IN,
            Error::UserAnotherAlreadyLoggedIn => pkcs11::CKR_USER_ANOTHER_ALREADY_LOGGED_IN,
            Error::UserNotLoggedIn => pkcs11::CKR_USER_NOT_LOGGED_IN,
            Error::UserPinNotInitialized => pkcs11::CKR_USER_PIN_NOT_INITIALIZED,
            Error::DeviceError => pkcs11::CKR_DEVICE_ERROR,
            Error::Failed => pkcs11::CKR_FUNCTION_FAILED,
        }
    }
}
