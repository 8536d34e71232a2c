use std::{fmt, slice};

use crate::pkcs11;

// todo: zeroize the buffer on drop
#[derive(Clone, Eq, PartialEq)]
pub struct Pin(Vec<u8>);

impl Pin {
    /// Copies the caller's PIN buffer. Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `pPin` must either be null or point to at least `ulPinLen` readable bytes.
    pub unsafe fn from_raw_parts(
        pPin: pkcs11::CK_UTF8CHAR_PTR,
        ulPinLen: pkcs11::CK_ULONG,
    ) -> Option<Self> {
        if pPin.is_null() {
            return None;
        }
        let len = usize::try_from(ulPinLen).ok()?;
        Some(Self(unsafe { slice::from_raw_parts(pPin, len) }.to_vec()))
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for Pin {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pin_pointer_is_rejected() {
        assert!(unsafe { Pin::from_raw_parts(std::ptr::null_mut(), 4) }.is_none());
    }

    #[test]
    fn raw_parts_copy_exactly_the_given_length() {
        let mut buffer = *b"123456xx";
        let pin = unsafe { Pin::from_raw_parts(buffer.as_mut_ptr(), 6) }.unwrap();
        assert_eq!(pin, Pin::from("123456"));
        assert_eq!(pin.len(), 6);
    }

    #[test]
    fn debug_output_hides_the_pin() {
        assert_eq!(format!("{:?}", Pin::from("secret")), "Pin(<redacted>)");
    }
}
