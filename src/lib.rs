#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

//! PKCS#11 session and login management.
//!
//! The library exports the Cryptoki session functions (`C_OpenSession`,
//! `C_CloseSession`, `C_CloseAllSessions`, `C_GetSessionInfo`, `C_Login`,
//! `C_Logout`) together with `C_Initialize`, `C_Finalize` and
//! `C_GetFunctionList`. Everything else in the function list is null.

use std::{ptr, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, error, info};

pub mod config;
pub mod controller;
pub mod error;
pub mod pin;
pub mod registry;
pub mod session;
pub mod slot;
pub mod token;

use crate::{
    config::Config,
    controller::SessionController,
    error::Error,
    pin::Pin,
    session::SessionHandle,
    slot::SlotId,
};

mod pkcs11 {
    #![allow(unused)]
    pub use cryptoki_sys::*;
}

static PROVIDER: Lazy<RwLock<Option<Arc<SessionController>>>> = Lazy::new(|| RwLock::new(None));

/// Installs a controller built from `config`.
pub fn initialize(config: &Config) -> Result<(), Error> {
    let mut provider = PROVIDER.write();
    if provider.is_some() {
        return Err(Error::AlreadyInitialized);
    }
    let controller = SessionController::from_config(config);
    info!(
        "initialized with {} slot(s), at most {} session(s)",
        controller.slots().len(),
        controller.registry().max_sessions()
    );
    *provider = Some(Arc::new(controller));
    Ok(())
}

/// Closes all sessions and removes the controller. Calls that already hold
/// the controller finish against it; later calls fail with `NotInitialized`.
pub fn finalize() -> Result<(), Error> {
    let controller = PROVIDER.write().take().ok_or(Error::NotInitialized)?;
    let result = controller.finalize();
    info!("finalized");
    result
}

fn provider() -> Result<Arc<SessionController>, Error> {
    PROVIDER.read().clone().ok_or(Error::NotInitialized)
}

fn to_rv(function: &str, result: Result<(), Error>) -> pkcs11::CK_RV {
    match result {
        Ok(()) => pkcs11::CKR_OK,
        Err(Error::Failed) => {
            error!("{function} failed");
            pkcs11::CKR_FUNCTION_FAILED
        }
        Err(err) => {
            debug!("{function}: {err}");
            err.rv()
        }
    }
}

#[no_mangle]
/// # Safety
///
/// `pInitArgs` must be null or point to a valid `CK_C_INITIALIZE_ARGS`.
pub unsafe extern "C" fn C_Initialize(pInitArgs: pkcs11::CK_VOID_PTR) -> pkcs11::CK_RV {
    debug!("C_Initialize");

    let result = (|| -> Result<(), Error> {
        if !pInitArgs.is_null() {
            let args = unsafe { &*(pInitArgs as *const pkcs11::CK_C_INITIALIZE_ARGS) };
            if !args.pReserved.is_null() {
                return Err(Error::ArgumentsBad);
            }
        }

        let config = Config::load().map_err(|err| {
            error!("cannot load configuration: {err}");
            Error::Failed
        })?;
        initialize(&config)
    })();

    to_rv("C_Initialize", result)
}

#[no_mangle]
pub extern "C" fn C_Finalize(pReserved: pkcs11::CK_VOID_PTR) -> pkcs11::CK_RV {
    debug!("C_Finalize");

    if !pReserved.is_null() {
        return pkcs11::CKR_ARGUMENTS_BAD;
    }

    to_rv("C_Finalize", finalize())
}

#[no_mangle]
/// # Safety
///
/// `phSession` must be null or valid for writes.
pub unsafe extern "C" fn C_OpenSession(
    slotID: pkcs11::CK_SLOT_ID,
    flags: pkcs11::CK_FLAGS,
    pApplication: pkcs11::CK_VOID_PTR,
    Notify: pkcs11::CK_NOTIFY,
    phSession: pkcs11::CK_SESSION_HANDLE_PTR,
) -> pkcs11::CK_RV {
    debug!("C_OpenSession slot: {}", slotID);

    let result = provider().and_then(|controller| {
        // Notification callbacks are not supported.
        if phSession.is_null() || !pApplication.is_null() || Notify.is_some() {
            return Err(Error::ArgumentsBad);
        }

        let handle = controller.open_session(SlotId(slotID), flags)?;
        unsafe {
            *phSession = handle.0;
        }
        Ok(())
    });

    to_rv("C_OpenSession", result)
}

#[no_mangle]
pub extern "C" fn C_CloseSession(hSession: pkcs11::CK_SESSION_HANDLE) -> pkcs11::CK_RV {
    debug!("C_CloseSession session: {}", hSession);

    let result =
        provider().and_then(|controller| controller.close_session(SessionHandle(hSession)));
    to_rv("C_CloseSession", result)
}

#[no_mangle]
pub extern "C" fn C_CloseAllSessions(slotID: pkcs11::CK_SLOT_ID) -> pkcs11::CK_RV {
    debug!("C_CloseAllSessions slot: {}", slotID);

    let result = provider().and_then(|controller| controller.close_all_sessions(SlotId(slotID)));
    to_rv("C_CloseAllSessions", result)
}

#[no_mangle]
/// # Safety
///
/// `pInfo` must be null or valid for writes.
pub unsafe extern "C" fn C_GetSessionInfo(
    hSession: pkcs11::CK_SESSION_HANDLE,
    pInfo: pkcs11::CK_SESSION_INFO_PTR,
) -> pkcs11::CK_RV {
    debug!("C_GetSessionInfo session: {}", hSession);

    let result = provider().and_then(|controller| {
        if pInfo.is_null() {
            return Err(Error::ArgumentsBad);
        }

        let info = controller.session_info(SessionHandle(hSession))?;
        unsafe {
            *pInfo = info.into();
        }
        Ok(())
    });

    to_rv("C_GetSessionInfo", result)
}

#[no_mangle]
/// # Safety
///
/// `pPin` must be null or point to `ulPinLen` readable bytes.
pub unsafe extern "C" fn C_Login(
    hSession: pkcs11::CK_SESSION_HANDLE,
    userType: pkcs11::CK_USER_TYPE,
    pPin: pkcs11::CK_UTF8CHAR_PTR,
    ulPinLen: pkcs11::CK_ULONG,
) -> pkcs11::CK_RV {
    debug!("C_Login session: {}", hSession);

    let result = provider().and_then(|controller| {
        if pPin.is_null() {
            return Err(Error::ArgumentsBad);
        }
        // The length is untrusted until it is in range.
        controller.check_pin_len(ulPinLen)?;

        let pin = unsafe { Pin::from_raw_parts(pPin, ulPinLen) };
        controller.login(SessionHandle(hSession), userType, pin.as_ref())
    });

    to_rv("C_Login", result)
}

#[no_mangle]
pub extern "C" fn C_Logout(hSession: pkcs11::CK_SESSION_HANDLE) -> pkcs11::CK_RV {
    debug!("C_Logout session: {}", hSession);

    let result = provider().and_then(|controller| controller.logout(SessionHandle(hSession)));
    to_rv("C_Logout", result)
}

static FUNCTION_LIST: pkcs11::CK_FUNCTION_LIST = pkcs11::CK_FUNCTION_LIST {
    version: pkcs11::CK_VERSION { major: 0x02, minor: 0x28 },
    C_Initialize: Some(C_Initialize),
    C_Finalize: Some(C_Finalize),
    C_GetInfo: None,
    C_GetFunctionList: Some(C_GetFunctionList),
    C_GetSlotList: None,
    C_GetSlotInfo: None,
    C_GetTokenInfo: None,
    C_GetMechanismList: None,
    C_GetMechanismInfo: None,
    C_InitToken: None,
    C_InitPIN: None,
    C_SetPIN: None,
    C_OpenSession: Some(C_OpenSession),
    C_CloseSession: Some(C_CloseSession),
    C_CloseAllSessions: Some(C_CloseAllSessions),
    C_GetSessionInfo: Some(C_GetSessionInfo),
    C_GetOperationState: None,
    C_SetOperationState: None,
    C_Login: Some(C_Login),
    C_Logout: Some(C_Logout),
    C_CreateObject: None,
    C_CopyObject: None,
    C_DestroyObject: None,
    C_GetObjectSize: None,
    C_GetAttributeValue: None,
    C_SetAttributeValue: None,
    C_FindObjectsInit: None,
    C_FindObjects: None,
    C_FindObjectsFinal: None,
    C_EncryptInit: None,
    C_Encrypt: None,
    C_EncryptUpdate: None,
    C_EncryptFinal: None,
    C_DecryptInit: None,
    C_Decrypt: None,
    C_DecryptUpdate: None,
    C_DecryptFinal: None,
    C_DigestInit: None,
    C_Digest: None,
    C_DigestUpdate: None,
    C_DigestKey: None,
    C_DigestFinal: None,
    C_SignInit: None,
    C_Sign: None,
    C_SignUpdate: None,
    C_SignFinal: None,
    C_SignRecoverInit: None,
    C_SignRecover: None,
    C_VerifyInit: None,
    C_Verify: None,
    C_VerifyUpdate: None,
    C_VerifyFinal: None,
    C_VerifyRecoverInit: None,
    C_VerifyRecover: None,
    C_DigestEncryptUpdate: None,
    C_DecryptDigestUpdate: None,
    C_SignEncryptUpdate: None,
    C_DecryptVerifyUpdate: None,
    C_GenerateKey: None,
    C_GenerateKeyPair: None,
    C_WrapKey: None,
    C_UnwrapKey: None,
    C_DeriveKey: None,
    C_SeedRandom: None,
    C_GenerateRandom: None,
    C_GetFunctionStatus: None,
    C_CancelFunction: None,
    C_WaitForSlotEvent: None,
};

/// # Safety
///
/// `ppFunctionList` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn C_GetFunctionList(
    ppFunctionList: pkcs11::CK_FUNCTION_LIST_PTR_PTR,
) -> pkcs11::CK_RV {
    if ppFunctionList.is_null() {
        return pkcs11::CKR_ARGUMENTS_BAD;
    }

    unsafe {
        *ppFunctionList = ptr::addr_of!(FUNCTION_LIST) as pkcs11::CK_FUNCTION_LIST_PTR;
    }

    pkcs11::CKR_OK
}
