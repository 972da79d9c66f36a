//! Trace and span identifiers and the flags that travel with them.

use std::fmt;
use std::hash::Hash;
use std::ops::{BitAnd, BitOr, Not};

/// Flags carried alongside a trace.
///
/// Only bit 0 (`sampled`) is interpreted; the remaining bits are
/// propagated verbatim. See the W3C TraceContext specification's
/// [trace-flags] section for details.
///
/// [trace-flags]: https://www.w3.org/TR/trace-context/#trace-flags
#[derive(Clone, Debug, Default, PartialEq, Eq, Copy, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    /// Trace flags with the `sampled` flag set to `0`.
    pub const NOT_SAMPLED: TraceFlags = TraceFlags(0x00);

    /// Trace flags with the `sampled` flag set to `1`.
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    /// Construct new trace flags.
    pub const fn new(flags: u8) -> Self {
        TraceFlags(flags)
    }

    /// Returns `true` if the `sampled` flag is set.
    pub fn is_sampled(&self) -> bool {
        (*self & TraceFlags::SAMPLED) == TraceFlags::SAMPLED
    }

    /// Returns a copy of the current flags with the `sampled` flag updated.
    pub fn with_sampled(&self, sampled: bool) -> Self {
        if sampled {
            *self | TraceFlags::SAMPLED
        } else {
            *self & !TraceFlags::SAMPLED
        }
    }

    /// Returns the flags as a `u8`.
    pub fn to_u8(self) -> u8 {
        self.0
    }
}

impl BitAnd for TraceFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for TraceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl Not for TraceFlags {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl fmt::LowerHex for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A 16-byte value which identifies a trace, rendered as 32 lowercase hex
/// characters.
///
/// The id is valid if it contains at least one non-zero byte.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// Invalid (all-zero) trace id.
    pub const INVALID: TraceId = TraceId(0);

    /// Create a trace id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(u128::from_be_bytes(bytes))
    }

    /// Return the representation of this trace id as a byte array.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Parse a trace id from its canonical wire form.
    ///
    /// Strict: exactly 32 characters, all lowercase hex. Rejects the
    /// all-zero id, which downstream backends treat as absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use correlation::TraceId;
    ///
    /// assert!(TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").is_ok());
    /// assert!(TraceId::from_hex("42").is_err());
    /// assert!(TraceId::from_hex("4BF92F3577B34DA6A3CE929D0E0E4736").is_err());
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self, ParseIdError> {
        if !is_valid_trace_id(hex) {
            return Err(ParseIdError(()));
        }
        u128::from_str_radix(hex, 16)
            .map(TraceId)
            .map_err(|_| ParseIdError(()))
    }

    /// Returns `true` if the id is not all zeros.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// An 8-byte value which identifies a span, rendered as 16 lowercase hex
/// characters.
///
/// The id is valid if it contains at least one non-zero byte.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Invalid (all-zero) span id.
    pub const INVALID: SpanId = SpanId(0);

    /// Create a span id from its representation as a byte array.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(u64::from_be_bytes(bytes))
    }

    /// Return the representation of this span id as a byte array.
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse a span id from its canonical wire form.
    ///
    /// Strict: exactly 16 characters, all lowercase hex, not all zeros.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIdError> {
        if !is_valid_span_id(hex) {
            return Err(ParseIdError(()));
        }
        u64::from_str_radix(hex, 16)
            .map(SpanId)
            .map_err(|_| ParseIdError(()))
    }

    /// Returns `true` if the id is not all zeros.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Error returned when a string is not a well-formed id.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("id must be the exact-length lowercase hex form of a non-zero value")]
pub struct ParseIdError(());

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Returns `true` for a 32-character lowercase hex string that is not all
/// zeros.
pub fn is_valid_trace_id(s: &str) -> bool {
    s.len() == 32 && is_lower_hex(s) && s.bytes().any(|b| b != b'0')
}

/// Returns `true` for a 16-character lowercase hex string that is not all
/// zeros.
pub fn is_valid_span_id(s: &str) -> bool {
    s.len() == 16 && is_lower_hex(s) && s.bytes().any(|b| b != b'0')
}
