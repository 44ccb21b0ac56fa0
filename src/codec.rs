//! Provides the tagged binary struct encoding used to persist replies in the cache tier.
//!
//! A struct is written as an ordered sequence of fields, each consisting of a one byte **type
//! tag**, a two byte **field id** (big endian) and the value itself. The sequence is terminated
//! by the **stop** tag (`0`) which carries no field id. Struct begin and end are implicit.
//!
//! Values are encoded as follows:
//! * **Bool** and **I8**: a single byte.
//! * **I16**, **I32**, **I64**: big endian fixed width integers.
//! * **Double**: the IEEE-754 bits as big endian u64.
//! * **Binary**: a u32 length followed by the raw bytes (used for strings as well).
//! * **Struct**: a nested sequence of fields up to its own stop tag.
//! * **List**: the type tag of the elements, a u32 count and the elements themselves.
//!
//! As the type tag determines how many bytes a value occupies, a reader can always skip fields
//! it doesn't know. This permits readers and writers of different schema versions to share the
//! same cache entries.
//!
//! # Example
//!
//! ```
//! # use lookaside::codec::{self, Message, Reader, Writer, CodecError, FieldType};
//! #[derive(Debug, PartialEq, Default)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! impl Message for Point {
//!     fn serialize(&self, writer: &mut Writer) {
//!         writer.write_field(1, &self.x);
//!         writer.write_field(2, &self.y);
//!         writer.write_stop();
//!     }
//!
//!     fn deserialize(reader: &mut Reader) -> Result<Self, CodecError> {
//!         let mut point = Point::default();
//!         loop {
//!             match reader.read_field_header()? {
//!                 (FieldType::Stop, _) => return Ok(point),
//!                 (field_type, 1) => point.x = reader.read(field_type)?,
//!                 (field_type, 2) => point.y = reader.read(field_type)?,
//!                 (field_type, _) => reader.skip(field_type)?,
//!             }
//!         }
//!     }
//! }
//!
//! let data = codec::serialize(&Point { x: 3, y: -4 });
//! assert_eq!(codec::deserialize::<Point>(data).unwrap(), Point { x: 3, y: -4 });
//! ```
use std::error::Error;
use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Limits how deep structs and lists may be nested within each other.
///
/// Cached entries aren't trusted, therefore we never recurse unbounded while skipping.
pub const MAX_NESTING: usize = 64;

/// Enumerates the type tags of the encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum FieldType {
    /// Terminates a struct.
    Stop = 0,
    /// A boolean stored as single byte.
    Bool = 1,
    /// A signed 8 bit integer.
    I8 = 2,
    /// A signed 16 bit integer.
    I16 = 3,
    /// A signed 32 bit integer.
    I32 = 4,
    /// A signed 64 bit integer.
    I64 = 5,
    /// A 64 bit floating point number.
    Double = 6,
    /// A length prefixed byte sequence.
    Binary = 7,
    /// A nested struct.
    Struct = 8,
    /// A homogeneous list of values.
    List = 9,
}

/// Enumerates the errors which can occur while decoding.
#[derive(Debug)]
pub enum CodecError {
    /// The input ended before the expected amount of bytes could be read.
    Truncated {
        /// The number of bytes which were required.
        expected: usize,
        /// The number of bytes which were left.
        remaining: usize,
    },

    /// An unknown type tag was encountered.
    UnknownFieldType(u8),

    /// A known field was encoded using an unexpected type.
    UnexpectedFieldType {
        /// The type tag required by the reader.
        expected: FieldType,
        /// The type tag found in the input.
        actual: FieldType,
    },

    /// A value was structurally valid but couldn't be interpreted (e.g. invalid UTF-8).
    InvalidValue(String),

    /// Structs or lists were nested deeper than [MAX_NESTING].
    NestingTooDeep,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CodecError::Truncated {
                expected,
                remaining,
            } => write!(
                f,
                "Truncated input: expected {} bytes but only {} remain",
                expected, remaining
            ),
            CodecError::UnknownFieldType(tag) => write!(f, "Unknown field type: {}", tag),
            CodecError::UnexpectedFieldType { expected, actual } => {
                write!(f, "Expected a field of type {:?} but got {:?}", expected, actual)
            }
            CodecError::InvalidValue(message) => write!(f, "Invalid value: {}", message),
            CodecError::NestingTooDeep => {
                write!(f, "Input is nested deeper than {} levels", MAX_NESTING)
            }
        }
    }
}

impl Error for CodecError {}

/// Represents a value which can be stored as a field.
pub trait Field: Sized {
    /// Contains the type tag written in front of the value.
    const FIELD_TYPE: FieldType;

    /// Writes the raw value (without any field header).
    fn write(&self, writer: &mut Writer);

    /// Reads the raw value (the field header has already been consumed).
    fn read(reader: &mut Reader) -> Result<Self, CodecError>;
}

/// Represents a struct which can be converted into bytes and back.
///
/// Implementations write all their fields followed by [Writer::write_stop] and read fields
/// until the stop tag is encountered, skipping all unknown field ids.
pub trait Message: Sized {
    /// Writes all fields of this struct followed by the stop tag.
    fn serialize(&self, writer: &mut Writer);

    /// Reads a struct up to and including its stop tag.
    fn deserialize(reader: &mut Reader) -> Result<Self, CodecError>;
}

/// Serializes the given message into a byte buffer.
pub fn serialize<M: Message>(message: &M) -> Bytes {
    let mut writer = Writer::new();
    message.serialize(&mut writer);
    writer.finish()
}

/// Deserializes a message from the given byte buffer.
///
/// Note that trailing data after the stop tag of the outermost struct is ignored.
pub fn deserialize<M: Message>(data: Bytes) -> Result<M, CodecError> {
    let mut reader = Reader::new(data);
    M::deserialize(&mut reader)
}

/// Accumulates an encoded struct in memory.
pub struct Writer {
    buffer: BytesMut,
}

impl Default for Writer {
    fn default() -> Self {
        Writer::new()
    }
}

impl Writer {
    /// Creates a new writer with a small pre-allocated buffer.
    pub fn new() -> Self {
        Writer {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Writes the header of a field.
    pub fn write_field_header(&mut self, field_type: FieldType, field_id: i16) {
        self.buffer.put_u8(field_type as u8);
        self.buffer.put_i16(field_id);
    }

    /// Writes a complete field, header and value.
    pub fn write_field<T: Field>(&mut self, field_id: i16, value: &T) {
        self.write_field_header(T::FIELD_TYPE, field_id);
        value.write(self);
    }

    /// Writes the field if a value is present and omits it otherwise.
    pub fn write_optional_field<T: Field>(&mut self, field_id: i16, value: &Option<T>) {
        if let Some(value) = value {
            self.write_field(field_id, value);
        }
    }

    /// Writes a nested struct as field.
    pub fn write_struct_field<M: Message>(&mut self, field_id: i16, message: &M) {
        self.write_field_header(FieldType::Struct, field_id);
        message.serialize(self);
    }

    /// Terminates the current struct.
    pub fn write_stop(&mut self) {
        self.buffer.put_u8(FieldType::Stop as u8);
    }

    /// Writes a raw boolean.
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.put_u8(u8::from(value));
    }

    /// Writes a raw byte.
    pub fn write_i8(&mut self, value: i8) {
        self.buffer.put_i8(value);
    }

    /// Writes a raw 16 bit integer.
    pub fn write_i16(&mut self, value: i16) {
        self.buffer.put_i16(value);
    }

    /// Writes a raw 32 bit integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32(value);
    }

    /// Writes a raw 64 bit integer.
    pub fn write_i64(&mut self, value: i64) {
        self.buffer.put_i64(value);
    }

    /// Writes a raw double.
    pub fn write_f64(&mut self, value: f64) {
        self.buffer.put_u64(value.to_bits());
    }

    /// Writes a length prefixed byte sequence.
    pub fn write_binary(&mut self, value: &[u8]) {
        self.buffer.put_u32(value.len() as u32);
        self.buffer.put_slice(value);
    }

    /// Writes the header of a list.
    pub fn write_list_header(&mut self, element_type: FieldType, count: usize) {
        self.buffer.put_u8(element_type as u8);
        self.buffer.put_u32(count as u32);
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Determines if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the encoded data.
    pub fn finish(self) -> Bytes {
        self.buffer.freeze()
    }
}

/// Reads an encoded struct from a byte buffer.
///
/// Binary values are returned as slices of the underlying buffer, so no copies are made.
pub struct Reader {
    data: Bytes,
    depth: usize,
}

impl Reader {
    /// Creates a reader for the given data.
    pub fn new(data: Bytes) -> Self {
        Reader { data, depth: 0 }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    fn ensure(&self, expected: usize) -> Result<(), CodecError> {
        if self.data.remaining() < expected {
            Err(CodecError::Truncated {
                expected,
                remaining: self.data.remaining(),
            })
        } else {
            Ok(())
        }
    }

    fn enter(&mut self) -> Result<(), CodecError> {
        if self.depth >= MAX_NESTING {
            return Err(CodecError::NestingTooDeep);
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn read_field_type(&mut self) -> Result<FieldType, CodecError> {
        self.ensure(1)?;
        let tag = self.data.get_u8();
        FieldType::from_u8(tag).ok_or(CodecError::UnknownFieldType(tag))
    }

    /// Reads the next field header.
    ///
    /// Returns the type tag and the field id. For the stop tag, the field id is always **0** as
    /// no id is stored.
    pub fn read_field_header(&mut self) -> Result<(FieldType, i16), CodecError> {
        let field_type = self.read_field_type()?;
        if field_type == FieldType::Stop {
            return Ok((FieldType::Stop, 0));
        }

        let field_id = self.read_i16()?;
        Ok((field_type, field_id))
    }

    /// Reads the value of a field whose header announced the given type.
    pub fn read<T: Field>(&mut self, field_type: FieldType) -> Result<T, CodecError> {
        if field_type != T::FIELD_TYPE {
            return Err(CodecError::UnexpectedFieldType {
                expected: T::FIELD_TYPE,
                actual: field_type,
            });
        }

        T::read(self)
    }

    /// Reads a nested struct whose header announced the given type.
    pub fn read_struct<M: Message>(&mut self, field_type: FieldType) -> Result<M, CodecError> {
        if field_type != FieldType::Struct {
            return Err(CodecError::UnexpectedFieldType {
                expected: FieldType::Struct,
                actual: field_type,
            });
        }

        self.enter()?;
        let result = M::deserialize(self);
        self.leave();
        result
    }

    /// Reads a raw boolean.
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        self.ensure(1)?;
        Ok(self.data.get_u8() != 0)
    }

    /// Reads a raw byte.
    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        self.ensure(1)?;
        Ok(self.data.get_i8())
    }

    /// Reads a raw 16 bit integer.
    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.ensure(2)?;
        Ok(self.data.get_i16())
    }

    /// Reads a raw 32 bit integer.
    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.data.get_i32())
    }

    /// Reads a raw 64 bit integer.
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.data.get_i64())
    }

    /// Reads a raw double.
    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.ensure(8)?;
        Ok(f64::from_bits(self.data.get_u64()))
    }

    fn read_length(&mut self) -> Result<usize, CodecError> {
        self.ensure(4)?;
        Ok(self.data.get_u32() as usize)
    }

    /// Reads a length prefixed byte sequence.
    pub fn read_binary(&mut self) -> Result<Bytes, CodecError> {
        let len = self.read_length()?;
        self.ensure(len)?;
        Ok(self.data.copy_to_bytes(len))
    }

    /// Reads the header of a list and returns the element type and count.
    ///
    /// As each element occupies at least one byte, a count exceeding the remaining input is
    /// rejected right away.
    pub fn read_list_header(&mut self) -> Result<(FieldType, usize), CodecError> {
        let element_type = self.read_field_type()?;
        if element_type == FieldType::Stop {
            return Err(CodecError::InvalidValue(
                "A list cannot contain stop markers".to_owned(),
            ));
        }

        let count = self.read_length()?;
        self.ensure(count)?;

        Ok((element_type, count))
    }

    fn advance(&mut self, len: usize) -> Result<(), CodecError> {
        self.ensure(len)?;
        self.data.advance(len);
        Ok(())
    }

    /// Skips over a value of the given type.
    ///
    /// This is used to ignore fields which are unknown to the reader.
    pub fn skip(&mut self, field_type: FieldType) -> Result<(), CodecError> {
        match field_type {
            FieldType::Stop => Ok(()),
            FieldType::Bool | FieldType::I8 => self.advance(1),
            FieldType::I16 => self.advance(2),
            FieldType::I32 => self.advance(4),
            FieldType::I64 | FieldType::Double => self.advance(8),
            FieldType::Binary => {
                let len = self.read_length()?;
                self.advance(len)
            }
            FieldType::Struct => {
                self.enter()?;
                loop {
                    let (field_type, _) = self.read_field_header()?;
                    if field_type == FieldType::Stop {
                        break;
                    }
                    self.skip(field_type)?;
                }
                self.leave();
                Ok(())
            }
            FieldType::List => {
                let (element_type, count) = self.read_list_header()?;
                self.enter()?;
                for _ in 0..count {
                    self.skip(element_type)?;
                }
                self.leave();
                Ok(())
            }
        }
    }
}

impl Field for bool {
    const FIELD_TYPE: FieldType = FieldType::Bool;

    fn write(&self, writer: &mut Writer) {
        writer.write_bool(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        reader.read_bool()
    }
}

impl Field for i8 {
    const FIELD_TYPE: FieldType = FieldType::I8;

    fn write(&self, writer: &mut Writer) {
        writer.write_i8(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        reader.read_i8()
    }
}

impl Field for i16 {
    const FIELD_TYPE: FieldType = FieldType::I16;

    fn write(&self, writer: &mut Writer) {
        writer.write_i16(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        reader.read_i16()
    }
}

impl Field for i32 {
    const FIELD_TYPE: FieldType = FieldType::I32;

    fn write(&self, writer: &mut Writer) {
        writer.write_i32(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        reader.read_i32()
    }
}

impl Field for i64 {
    const FIELD_TYPE: FieldType = FieldType::I64;

    fn write(&self, writer: &mut Writer) {
        writer.write_i64(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        reader.read_i64()
    }
}

impl Field for f64 {
    const FIELD_TYPE: FieldType = FieldType::Double;

    fn write(&self, writer: &mut Writer) {
        writer.write_f64(*self);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        reader.read_f64()
    }
}

impl Field for Bytes {
    const FIELD_TYPE: FieldType = FieldType::Binary;

    fn write(&self, writer: &mut Writer) {
        writer.write_binary(self);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        reader.read_binary()
    }
}

impl Field for String {
    const FIELD_TYPE: FieldType = FieldType::Binary;

    fn write(&self, writer: &mut Writer) {
        writer.write_binary(self.as_bytes());
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        let data = reader.read_binary()?;
        String::from_utf8(data.to_vec())
            .map_err(|error| CodecError::InvalidValue(format!("Invalid UTF-8 string: {}", error)))
    }
}

impl<T: Field> Field for Vec<T> {
    const FIELD_TYPE: FieldType = FieldType::List;

    fn write(&self, writer: &mut Writer) {
        writer.write_list_header(T::FIELD_TYPE, self.len());
        for element in self {
            element.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        let (element_type, count) = reader.read_list_header()?;
        if element_type != T::FIELD_TYPE {
            return Err(CodecError::UnexpectedFieldType {
                expected: T::FIELD_TYPE,
                actual: element_type,
            });
        }

        reader.enter()?;
        let mut result = Vec::with_capacity(count);
        for _ in 0..count {
            result.push(T::read(reader)?);
        }
        reader.leave();

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{
        deserialize, serialize, CodecError, FieldType, Message, Reader, Writer, MAX_NESTING,
    };
    use bytes::Bytes;

    /// The "current" schema version as known by the reader.
    #[derive(Debug, Default, PartialEq, Clone)]
    struct Profile {
        id: i64,
        name: String,
        active: bool,
    }

    impl Message for Profile {
        fn serialize(&self, writer: &mut Writer) {
            writer.write_field(1, &self.id);
            writer.write_field(2, &self.name);
            writer.write_field(3, &self.active);
            writer.write_stop();
        }

        fn deserialize(reader: &mut Reader) -> Result<Self, CodecError> {
            let mut profile = Profile::default();
            loop {
                match reader.read_field_header()? {
                    (FieldType::Stop, _) => return Ok(profile),
                    (field_type, 1) => profile.id = reader.read(field_type)?,
                    (field_type, 2) => profile.name = reader.read(field_type)?,
                    (field_type, 3) => profile.active = reader.read(field_type)?,
                    (field_type, _) => reader.skip(field_type)?,
                }
            }
        }
    }

    /// A "newer" schema which adds fields of all kinds.
    #[derive(Debug, Default, PartialEq, Clone)]
    struct ExtendedProfile {
        profile: Profile,
        score: f64,
        tags: Vec<String>,
        avatar: Bytes,
        level: i8,
        rank: i16,
        visits: i32,
        previous: Option<Box<ExtendedProfile>>,
    }

    impl Message for ExtendedProfile {
        fn serialize(&self, writer: &mut Writer) {
            writer.write_field(10, &self.score);
            writer.write_field(1, &self.profile.id);
            writer.write_field(11, &self.tags);
            writer.write_field(2, &self.profile.name);
            writer.write_field(12, &self.avatar);
            writer.write_field(13, &self.level);
            writer.write_field(14, &self.rank);
            writer.write_field(15, &self.visits);
            if let Some(previous) = &self.previous {
                writer.write_struct_field(16, previous.as_ref());
            }
            writer.write_field(3, &self.profile.active);
            writer.write_stop();
        }

        fn deserialize(reader: &mut Reader) -> Result<Self, CodecError> {
            let mut result = ExtendedProfile::default();
            loop {
                match reader.read_field_header()? {
                    (FieldType::Stop, _) => return Ok(result),
                    (field_type, 1) => result.profile.id = reader.read(field_type)?,
                    (field_type, 2) => result.profile.name = reader.read(field_type)?,
                    (field_type, 3) => result.profile.active = reader.read(field_type)?,
                    (field_type, 10) => result.score = reader.read(field_type)?,
                    (field_type, 11) => result.tags = reader.read(field_type)?,
                    (field_type, 12) => result.avatar = reader.read(field_type)?,
                    (field_type, 13) => result.level = reader.read(field_type)?,
                    (field_type, 14) => result.rank = reader.read(field_type)?,
                    (field_type, 15) => result.visits = reader.read(field_type)?,
                    (field_type, 16) => {
                        result.previous = Some(Box::new(reader.read_struct(field_type)?))
                    }
                    (field_type, _) => reader.skip(field_type)?,
                }
            }
        }
    }

    fn extended() -> ExtendedProfile {
        ExtendedProfile {
            profile: Profile {
                id: -42,
                name: "Zoë".to_owned(),
                active: true,
            },
            score: 13.25,
            tags: vec!["a".to_owned(), "".to_owned(), "long tag".to_owned()],
            avatar: Bytes::from_static(&[0, 1, 2, 255]),
            level: -3,
            rank: 1024,
            visits: 70_000,
            previous: Some(Box::new(ExtendedProfile {
                score: 1.5,
                ..ExtendedProfile::default()
            })),
        }
    }

    #[test]
    fn all_field_types_survive_a_round_trip() {
        let value = extended();
        let result: ExtendedProfile = deserialize(serialize(&value)).unwrap();
        assert_eq!(result, value);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        // Write using the newer schema and read back using the older one...
        let data = serialize(&extended());
        let profile: Profile = deserialize(data).unwrap();

        assert_eq!(
            profile,
            Profile {
                id: -42,
                name: "Zoë".to_owned(),
                active: true,
            }
        );
    }

    #[test]
    fn missing_fields_keep_their_defaults() {
        // Write using the older schema and read back using the newer one...
        let profile = Profile {
            id: 7,
            name: "x".to_owned(),
            active: false,
        };
        let result: ExtendedProfile = deserialize(serialize(&profile)).unwrap();

        assert_eq!(result.profile, profile);
        assert_eq!(result.tags.is_empty(), true);
        assert_eq!(result.previous.is_none(), true);
    }

    #[test]
    fn truncated_input_is_detected() {
        let data = serialize(&extended());
        for len in 0..data.len() - 1 {
            let result = deserialize::<ExtendedProfile>(data.slice(0..len));
            assert_eq!(result.is_err(), true, "Prefix of length {} was accepted", len);
        }
    }

    #[test]
    fn unknown_type_tags_are_rejected() {
        let result = deserialize::<Profile>(Bytes::from_static(&[42, 0, 1]));
        assert!(matches!(result, Err(CodecError::UnknownFieldType(42))));
    }

    #[test]
    fn type_mismatches_are_rejected() {
        let mut writer = Writer::new();
        writer.write_field(1, &"not a number".to_owned());
        writer.write_stop();

        let result = deserialize::<Profile>(writer.finish());
        assert!(matches!(
            result,
            Err(CodecError::UnexpectedFieldType {
                expected: FieldType::I64,
                actual: FieldType::Binary,
            })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut writer = Writer::new();
        writer.write_field(2, &Bytes::from_static(&[0xff, 0xfe]));
        writer.write_stop();

        let result = deserialize::<Profile>(writer.finish());
        assert!(matches!(result, Err(CodecError::InvalidValue(_))));
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        // Build an unknown field (id 99) which nests structs deeper than permitted...
        let mut writer = Writer::new();
        for _ in 0..=MAX_NESTING {
            writer.write_field_header(FieldType::Struct, 99);
        }
        for _ in 0..=MAX_NESTING {
            writer.write_stop();
        }
        writer.write_stop();

        let result = deserialize::<Profile>(writer.finish());
        assert!(matches!(result, Err(CodecError::NestingTooDeep)));
    }

    #[test]
    fn oversized_list_counts_are_rejected() {
        let mut writer = Writer::new();
        writer.write_field_header(FieldType::List, 99);
        writer.write_list_header(FieldType::I64, 1_000_000);
        writer.write_stop();

        let result = deserialize::<Profile>(writer.finish());
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }
}
