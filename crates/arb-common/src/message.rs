//! Field-list message serialization and parsing.
//!
//! A message is an ordered list of UTF-8 string fields sent as one binary
//! WebSocket frame. Field 0 is the sender's self-reported name and field 1 is
//! the message kind; anything after that is kind-specific payload.
//!
//! Wire layout:
//!
//! ```text
//! [count: u8] ( [len: u16 BE] [len bytes of UTF-8] ) * count
//! ```

use crate::types::kind;
use std::fmt;
use thiserror::Error;

/// Maximum number of fields in one message.
pub const MAX_FIELDS: usize = 32;

/// Maximum length of a single field in bytes.
pub const MAX_FIELD_LEN: usize = 4096;

/// Maximum total encoded message size.
pub const MAX_MESSAGE_SIZE: usize = 1 + MAX_FIELDS * (2 + MAX_FIELD_LEN);

/// A parsed message: an ordered list of string fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Message {
    fields: Vec<String>,
}

/// Errors that can occur while encoding or parsing a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The input byte slice was empty.
    #[error("message is empty")]
    Empty,
    /// The input ended before the declared fields were read.
    #[error("message too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The message declares or holds more fields than allowed.
    #[error("too many fields: max {max}, got {actual}")]
    TooManyFields {
        /// Maximum allowed field count.
        max: usize,
        /// Actual field count.
        actual: usize,
    },
    /// A single field exceeds the maximum allowed length.
    #[error("field {index} too large: max {max}, got {actual}")]
    FieldTooLarge {
        /// Position of the offending field.
        index: usize,
        /// Maximum allowed field length.
        max: usize,
        /// Actual field length.
        actual: usize,
    },
    /// A field is not valid UTF-8.
    #[error("field {index} is not valid utf-8")]
    InvalidUtf8 {
        /// Position of the offending field.
        index: usize,
    },
    /// Bytes remain after the last declared field.
    #[error("{0} trailing bytes after last field")]
    TrailingBytes(usize),
}

impl Message {
    /// Creates a message from any sequence of string-like fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use arb_common::Message;
    /// let msg = Message::new(["meter1", "report", "42"]);
    /// assert_eq!(msg.sender(), Some("meter1"));
    /// assert_eq!(msg.kind(), Some("report"));
    /// assert_eq!(msg.payload(), ["42"]);
    /// ```
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a `ping` from the given sender.
    #[must_use]
    pub fn ping(sender: &str) -> Self {
        Self::new([sender, kind::PING])
    }

    /// Creates a `pong` reply from the given sender.
    #[must_use]
    pub fn pong(sender: &str) -> Self {
        Self::new([sender, kind::PONG])
    }

    /// Creates an `addmeter` announcement from the given sender.
    #[must_use]
    pub fn addmeter(sender: &str) -> Self {
        Self::new([sender, kind::ADDMETER])
    }

    /// Creates a `report` carrying the given payload fields.
    #[must_use]
    pub fn report(sender: &str, payload: &[&str]) -> Self {
        let mut fields = Vec::with_capacity(2 + payload.len());
        fields.push(sender.to_string());
        fields.push(kind::REPORT.to_string());
        fields.extend(payload.iter().map(|p| (*p).to_string()));
        Self { fields }
    }

    /// All fields in order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Field 0, the sender's self-reported name.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }

    /// Field 1, the message kind.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.fields.get(1).map(String::as_str)
    }

    /// Fields after the kind.
    #[must_use]
    pub fn payload(&self) -> &[String] {
        self.fields.get(2..).unwrap_or_default()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the message has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Checks the message against the wire limits.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::TooManyFields`] or [`MessageError::FieldTooLarge`].
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.fields.len() > MAX_FIELDS {
            return Err(MessageError::TooManyFields {
                max: MAX_FIELDS,
                actual: self.fields.len(),
            });
        }
        for (index, field) in self.fields.iter().enumerate() {
            if field.len() > MAX_FIELD_LEN {
                return Err(MessageError::FieldTooLarge {
                    index,
                    max: MAX_FIELD_LEN,
                    actual: field.len(),
                });
            }
        }
        Ok(())
    }

    /// Serializes this message into a byte vector for WebSocket transmission.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the wire limits.
    ///
    /// # Examples
    ///
    /// ```
    /// use arb_common::Message;
    /// let bytes = Message::ping("dev1").serialize().unwrap();
    /// assert_eq!(bytes[0], 2);
    /// ```
    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize(&self) -> Result<Vec<u8>, MessageError> {
        self.validate()?;
        let body: usize = self.fields.iter().map(|f| 2 + f.len()).sum();
        let mut v = Vec::with_capacity(1 + body);
        // validate() bounds both casts
        v.push(self.fields.len() as u8);
        for field in &self.fields {
            v.extend_from_slice(&(field.len() as u16).to_be_bytes());
            v.extend_from_slice(field.as_bytes());
        }
        Ok(v)
    }

    /// Parses a byte slice into a `Message`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] if the data is empty, truncated, over the
    /// field limits, not UTF-8, or followed by trailing bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use arb_common::Message;
    /// let msg = Message::pong("A1");
    /// let parsed = Message::parse(&msg.serialize().unwrap()).unwrap();
    /// assert_eq!(msg, parsed);
    /// ```
    pub fn parse(data: &[u8]) -> Result<Self, MessageError> {
        let (&count, mut rest) = data.split_first().ok_or(MessageError::Empty)?;
        let count = usize::from(count);
        if count > MAX_FIELDS {
            return Err(MessageError::TooManyFields {
                max: MAX_FIELDS,
                actual: count,
            });
        }

        let mut fields = Vec::with_capacity(count);
        for index in 0..count {
            if rest.len() < 2 {
                return Err(MessageError::TooShort {
                    expected: data.len() - rest.len() + 2,
                    actual: data.len(),
                });
            }
            let len = usize::from(u16::from_be_bytes([rest[0], rest[1]]));
            if len > MAX_FIELD_LEN {
                return Err(MessageError::FieldTooLarge {
                    index,
                    max: MAX_FIELD_LEN,
                    actual: len,
                });
            }
            rest = &rest[2..];
            if rest.len() < len {
                return Err(MessageError::TooShort {
                    expected: data.len() - rest.len() + len,
                    actual: data.len(),
                });
            }
            let (raw, tail) = rest.split_at(len);
            let field = std::str::from_utf8(raw).map_err(|_| MessageError::InvalidUtf8 { index })?;
            fields.push(field.to_string());
            rest = tail;
        }

        if !rest.is_empty() {
            return Err(MessageError::TrailingBytes(rest.len()));
        }
        Ok(Self { fields })
    }
}

impl From<Vec<String>> for Message {
    fn from(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(field)?;
        }
        f.write_str("]")
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_fields() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(".{0,64}", 0..8)
    }

    proptest! {
        #[test]
        fn serialize_parse_roundtrip(fields in arb_fields()) {
            let msg = Message::from(fields);
            let bytes = msg.serialize().unwrap();
            let parsed = Message::parse(&bytes).unwrap();
            prop_assert_eq!(msg, parsed);
        }

        #[test]
        fn first_byte_is_field_count(fields in arb_fields()) {
            let msg = Message::from(fields);
            let bytes = msg.serialize().unwrap();
            prop_assert_eq!(usize::from(bytes[0]), msg.len());
        }

        #[test]
        fn parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = Message::parse(&data);
        }
    }
}
