//! Annotated regions of a memory block.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::Error;

/// The open annotation bag attached to every entry.
///
/// Analyzers store arbitrary keys here, such as display hints or error flags.
pub type UserDefined = BTreeMap<String, serde_json::Value>;

/// The decoded value of an entry.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Text(String),
    Bytes(Vec<u8>),
    /// A value produced by an analyzer which has no better representation.
    Opaque(serde_json::Value),
}

impl Value {
    /// Convert a json value supplied by an analyzer into a `Value`.
    ///
    /// Integers become `Unsigned` or `Signed`, strings become `Text`, and
    /// everything else is kept as-is in `Opaque`.
    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Number(number) => {
                if let Some(u) = number.as_u64() {
                    Value::Unsigned(u)
                } else if let Some(i) = number.as_i64() {
                    Value::Signed(i)
                } else {
                    Value::Opaque(value.clone())
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            _ => Value::Opaque(value.clone()),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Unsigned(u) => Some(u),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Unsigned(u) => write!(f, "0x{:x}", u),
            Value::Signed(i) => write!(f, "{}", i),
            Value::Text(ref s) => write!(f, "{:?}", s),
            Value::Bytes(ref bytes) => {
                for byte in bytes {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Opaque(ref value) => write!(f, "{}", value),
        }
    }
}

/// One annotated region of a memory block, covering
/// `[address, address + length)`.
///
/// Entries are immutable once defined. Changing the type, value or length of
/// a region means undefining the entry and defining a new one. Only the
/// comment and the user-defined bag change in place, and only through
/// revision-logged workspace operations.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MemoryEntry {
    address: u64,
    length: u64,
    #[serde(rename = "type")]
    type_name: String,
    value: Value,
    user_defined: UserDefined,
    comment: Option<String>,
}

impl MemoryEntry {
    /// Create a new `MemoryEntry` with no comment and an empty user-defined
    /// bag.
    ///
    /// Fails if `length` is zero, or if the entry would run past the end of
    /// the address space.
    pub fn new<S: Into<String>>(
        address: u64,
        length: u64,
        type_name: S,
        value: Value,
    ) -> Result<MemoryEntry, Error> {
        if length == 0 {
            return Err(Error::InvalidArgument(format!(
                "entry at 0x{:x} must have a length of at least 1",
                address
            )));
        }
        if address.checked_add(length).is_none() {
            return Err(Error::InvalidArgument(format!(
                "entry at 0x{:x} with length 0x{:x} overflows the address space",
                address, length
            )));
        }
        Ok(MemoryEntry {
            address,
            length,
            type_name: type_name.into(),
            value,
            user_defined: UserDefined::new(),
            comment: None,
        })
    }

    /// Set the user-defined bag, consuming and returning the entry.
    pub fn with_user_defined(mut self, user_defined: UserDefined) -> MemoryEntry {
        self.user_defined = user_defined;
        self
    }

    /// Set the comment, consuming and returning the entry.
    pub fn with_comment(mut self, comment: Option<String>) -> MemoryEntry {
        self.comment = comment;
        self
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// The first address past the end of this entry.
    pub fn end(&self) -> u64 {
        self.address + self.length
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn user_defined(&self) -> &UserDefined {
        &self.user_defined
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Returns true if `address` falls inside this entry.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address < self.end()
    }

    pub(crate) fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    pub(crate) fn set_user_defined(&mut self, user_defined: UserDefined) {
        self.user_defined = user_defined;
    }
}

impl fmt::Display for MemoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "0x{:x}+{} {} = {}",
            self.address, self.length, self.type_name, self.value
        )?;
        if let Some(ref comment) = self.comment {
            write!(f, " ; {}", comment)?;
        }
        Ok(())
    }
}
