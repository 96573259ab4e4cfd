//! Bind value encoding.
use bytes::Bytes;
use std::fmt;

use crate::{ext::FmtExt, protocol::BindType};

/// A value ready to be sent with `BIND_VALUE`.
///
/// NULL is sent as an empty value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    bind_type: BindType,
    value: Bytes,
}

impl Encoded {
    pub fn new(value: impl Into<Bytes>, bind_type: BindType) -> Self {
        Self { bind_type, value: value.into() }
    }

    /// Textual value.
    pub fn string(value: impl Into<Bytes>) -> Self {
        Self::new(value, BindType::String)
    }

    /// NULL value.
    pub const fn null() -> Self {
        Self { bind_type: BindType::String, value: Bytes::new() }
    }

    pub fn bind_type(&self) -> BindType {
        self.bind_type
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn into_value(self) -> Bytes {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for Encoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Encoded")
            .field(&self.bind_type)
            .field(&self.value.lossy())
            .finish()
    }
}

/// A type that can be bound as a statement parameter.
pub trait Encode {
    fn encode(self) -> Encoded;
}

impl Encode for Encoded {
    fn encode(self) -> Encoded {
        self
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(self) -> Encoded {
        match self {
            Some(v) => v.encode(),
            None => Encoded::null(),
        }
    }
}

impl Encode for &str {
    fn encode(self) -> Encoded {
        Encoded::string(Bytes::copy_from_slice(self.as_bytes()))
    }
}

impl Encode for String {
    fn encode(self) -> Encoded {
        Encoded::string(self)
    }
}

impl Encode for &String {
    fn encode(self) -> Encoded {
        self.as_str().encode()
    }
}

impl Encode for &[u8] {
    fn encode(self) -> Encoded {
        Encoded::new(Bytes::copy_from_slice(self), BindType::Raw)
    }
}

impl Encode for Vec<u8> {
    fn encode(self) -> Encoded {
        Encoded::new(self, BindType::Raw)
    }
}

impl Encode for Bytes {
    fn encode(self) -> Encoded {
        Encoded::new(self, BindType::Raw)
    }
}

impl Encode for bool {
    fn encode(self) -> Encoded {
        Encoded::string(Bytes::from_static(if self { b"1" } else { b"0" }))
    }
}

macro_rules! encode_int {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode(self) -> Encoded {
                    let mut b = itoa::Buffer::new();
                    Encoded::string(Bytes::copy_from_slice(b.format(self).as_bytes()))
                }
            }
        )*
    };
}

encode_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! encode_float {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode(self) -> Encoded {
                    Encoded::string(self.to_string())
                }
            }
        )*
    };
}

encode_float!(f32, f64);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_values() {
        assert_eq!(42i32.encode(), Encoded::string("42"));
        assert_eq!((-7i64).encode().value().as_ref(), b"-7");
        assert_eq!(true.encode().value().as_ref(), b"1");
        assert_eq!(1.5f64.encode().value().as_ref(), b"1.5");
        assert_eq!("abc".encode().bind_type(), BindType::String);
        assert_eq!(vec![0u8, 1].encode().bind_type(), BindType::Raw);
        assert!(None::<i32>.encode().is_null());
        assert_eq!(Some("x").encode(), Encoded::string("x"));
    }
}
