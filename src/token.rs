//! The per-slot authentication endpoint.
//!
//! A [`Token`] owns the authoritative login state of its slot. The session
//! layer only asks it to verify a credential or to drop the current login and
//! mirrors the outcome into every session of the slot.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{config::TokenConfig, error::Error, pin::Pin, session::UserType};

/// Consecutive failed logins after which the token refuses every PIN.
pub const MAX_PIN_ATTEMPTS: u32 = 5;

/// Authenticated role of a token, or none.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoginState {
    #[default]
    LoggedOut,
    User,
    SecurityOfficer,
}

impl From<UserType> for LoginState {
    fn from(user: UserType) -> Self {
        match user {
            UserType::User => LoginState::User,
            UserType::SecurityOfficer => LoginState::SecurityOfficer,
        }
    }
}

pub trait Token: Send + Sync {
    fn login(&self, pin: &Pin, user: UserType) -> Result<(), Error>;

    fn logout(&self) -> Result<(), Error>;
}

/// Software token holding its PINs in memory.
pub struct SoftToken {
    label: String,
    so_pin: Option<Pin>,
    user_pin: Option<Pin>,
    state: Mutex<LoginState>,
    failed_attempts: AtomicU32,
}

impl SoftToken {
    pub fn new(label: impl Into<String>, so_pin: Option<Pin>, user_pin: Option<Pin>) -> Self {
        Self {
            label: label.into(),
            so_pin,
            user_pin,
            state: Mutex::new(LoginState::LoggedOut),
            failed_attempts: AtomicU32::new(0),
        }
    }

    pub fn login_state(&self) -> LoginState {
        *self.state.lock()
    }
}

impl From<&TokenConfig> for SoftToken {
    fn from(config: &TokenConfig) -> Self {
        Self::new(
            config.label.clone(),
            config.so_pin.as_deref().map(Pin::from),
            config.user_pin.as_deref().map(Pin::from),
        )
    }
}

impl Token for SoftToken {
    fn login(&self, pin: &Pin, user: UserType) -> Result<(), Error> {
        let mut state = self.state.lock();

        match (*state, user) {
            (LoginState::LoggedOut, _) => {}
            (LoginState::User, UserType::User)
            | (LoginState::SecurityOfficer, UserType::SecurityOfficer) => {
                return Err(Error::UserAlreadyLoggedIn)
            }
            _ => return Err(Error::UserAnotherAlreadyLoggedIn),
        }

        let stored = match user {
            UserType::User => self.user_pin.as_ref().ok_or(Error::UserPinNotInitialized)?,
            UserType::SecurityOfficer => self.so_pin.as_ref().ok_or(Error::PinIncorrect)?,
        };

        if self.failed_attempts.load(Ordering::SeqCst) >= MAX_PIN_ATTEMPTS {
            return Err(Error::PinLocked);
        }

        if stored != pin {
            let failed = self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(
                "token '{}' rejected a PIN ({}/{} attempts)",
                self.label, failed, MAX_PIN_ATTEMPTS
            );
            return Err(Error::PinIncorrect);
        }

        self.failed_attempts.store(0, Ordering::SeqCst);
        *state = user.into();
        debug!("token '{}' logged in as {:?}", self.label, user);
        Ok(())
    }

    fn logout(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if *state == LoginState::LoggedOut {
            return Err(Error::UserNotLoggedIn);
        }
        *state = LoginState::LoggedOut;
        debug!("token '{}' logged out", self.label);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use super::*;

    type Hook = Box<dyn Fn() + Send + Sync>;

    /// Token double that accepts any PIN and records how often it was called.
    #[derive(Default)]
    pub struct RecordingToken {
        pub logins: AtomicUsize,
        pub logouts: AtomicUsize,
        pub fail_login: Mutex<Option<Error>>,
        pub fail_logout: AtomicBool,
        /// Runs inside `logout`, after the call was counted.
        pub on_logout: Mutex<Option<Hook>>,
    }

    impl RecordingToken {
        pub fn logins(&self) -> usize {
            self.logins.load(Ordering::SeqCst)
        }

        pub fn logouts(&self) -> usize {
            self.logouts.load(Ordering::SeqCst)
        }

        pub fn fail_logout(&self, fail: bool) {
            self.fail_logout.store(fail, Ordering::SeqCst)
        }
    }

    impl Token for RecordingToken {
        fn login(&self, _pin: &Pin, _user: UserType) -> Result<(), Error> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            match *self.fail_login.lock() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn logout(&self) -> Result<(), Error> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.on_logout.lock().as_ref() {
                hook();
            }
            if self.fail_logout.load(Ordering::SeqCst) {
                Err(Error::DeviceError)
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SoftToken {
        SoftToken::new("test", Some(Pin::from("so-secret")), Some(Pin::from("1234")))
    }

    #[test]
    fn user_login_and_logout() {
        let token = token();
        token.login(&Pin::from("1234"), UserType::User).unwrap();
        assert_eq!(token.login_state(), LoginState::User);
        token.logout().unwrap();
        assert_eq!(token.login_state(), LoginState::LoggedOut);
    }

    #[test]
    fn wrong_pin_leaves_token_logged_out() {
        let token = token();
        assert_eq!(token.login(&Pin::from("4321"), UserType::User), Err(Error::PinIncorrect));
        assert_eq!(token.login_state(), LoginState::LoggedOut);
    }

    #[test]
    fn second_login_is_refused() {
        let token = token();
        token.login(&Pin::from("1234"), UserType::User).unwrap();
        assert_eq!(
            token.login(&Pin::from("1234"), UserType::User),
            Err(Error::UserAlreadyLoggedIn)
        );
        assert_eq!(
            token.login(&Pin::from("so-secret"), UserType::SecurityOfficer),
            Err(Error::UserAnotherAlreadyLoggedIn)
        );
    }

    #[test]
    fn missing_user_pin_is_reported() {
        let token = SoftToken::new("fresh", Some(Pin::from("so-secret")), None);
        assert_eq!(
            token.login(&Pin::from("1234"), UserType::User),
            Err(Error::UserPinNotInitialized)
        );
    }

    #[test]
    fn repeated_wrong_pins_lock_the_token() {
        let token = token();
        for _ in 0..MAX_PIN_ATTEMPTS {
            assert_eq!(token.login(&Pin::from("4321"), UserType::User), Err(Error::PinIncorrect));
        }

        assert_eq!(token.login(&Pin::from("1234"), UserType::User), Err(Error::PinLocked));
        assert_eq!(token.login_state(), LoginState::LoggedOut);
    }

    #[test]
    fn successful_login_resets_failed_attempts() {
        let token = token();
        for _ in 1..MAX_PIN_ATTEMPTS {
            token.login(&Pin::from("4321"), UserType::User).unwrap_err();
        }
        token.login(&Pin::from("1234"), UserType::User).unwrap();
        token.logout().unwrap();

        assert_eq!(token.login(&Pin::from("4321"), UserType::User), Err(Error::PinIncorrect));
        token.login(&Pin::from("1234"), UserType::User).unwrap();
    }

    #[test]
    fn logout_without_login_fails() {
        assert_eq!(token().logout(), Err(Error::UserNotLoggedIn));
    }
}
