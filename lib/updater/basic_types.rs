//! Fixed-width integer types decoded straight from raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::memory::Value;
use crate::Error;

/// Byte order of a multi-byte value.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    pub fn from_name(name: &str) -> Result<Endian, Error> {
        match name {
            "big" => Ok(Endian::Big),
            "little" => Ok(Endian::Little),
            _ => Err(Error::InvalidArgument(format!("unknown endian \"{}\"", name))),
        }
    }
}

impl Default for Endian {
    fn default() -> Endian {
        Endian::Little
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BasicType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
}

impl BasicType {
    /// Look up a basic type by name. Both `uint32` and `uint32_t` style
    /// names are accepted.
    pub fn from_name(name: &str) -> Result<BasicType, Error> {
        Ok(match name.trim_end_matches("_t") {
            "uint8" => BasicType::Uint8,
            "uint16" => BasicType::Uint16,
            "uint32" => BasicType::Uint32,
            "uint64" => BasicType::Uint64,
            "int8" => BasicType::Int8,
            "int16" => BasicType::Int16,
            "int32" => BasicType::Int32,
            "int64" => BasicType::Int64,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unknown basic type \"{}\"",
                    name
                )))
            }
        })
    }

    /// The type name given to entries of this type.
    pub fn name(&self) -> &'static str {
        match *self {
            BasicType::Uint8 => "uint8",
            BasicType::Uint16 => "uint16",
            BasicType::Uint32 => "uint32",
            BasicType::Uint64 => "uint64",
            BasicType::Int8 => "int8",
            BasicType::Int16 => "int16",
            BasicType::Int32 => "int32",
            BasicType::Int64 => "int64",
        }
    }

    /// The size of this type in bytes.
    pub fn size(&self) -> u64 {
        match *self {
            BasicType::Uint8 | BasicType::Int8 => 1,
            BasicType::Uint16 | BasicType::Int16 => 2,
            BasicType::Uint32 | BasicType::Int32 => 4,
            BasicType::Uint64 | BasicType::Int64 => 8,
        }
    }

    pub fn signed(&self) -> bool {
        matches!(
            *self,
            BasicType::Int8 | BasicType::Int16 | BasicType::Int32 | BasicType::Int64
        )
    }

    /// Decode a value of this type from exactly `size()` bytes.
    pub fn decode(&self, bytes: &[u8], endian: Endian) -> Result<Value, Error> {
        if bytes.len() as u64 != self.size() {
            return Err(Error::InvalidArgument(format!(
                "{} needs {} bytes, got {}",
                self,
                self.size(),
                bytes.len()
            )));
        }

        let unsigned = match endian {
            Endian::Big => bytes
                .iter()
                .fold(0u64, |value, byte| (value << 8) | *byte as u64),
            Endian::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |value, byte| (value << 8) | *byte as u64),
        };

        if self.signed() {
            let shift = 64 - self.size() * 8;
            Ok(Value::Signed(((unsigned << shift) as i64) >> shift))
        } else {
            Ok(Value::Unsigned(unsigned))
        }
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
