//! Defines the typed requests and replies which travel through a routing tree.
//!
//! Each [Request] type is bound to exactly one [Reply] type. Both are [Message]s, so that a reply
//! can be turned into bytes, stored in the cache tier and later be restored. A request which
//! carries a key to operate on additionally implements [Keyed].
//!
//! Two pairs of messages are provided: **Hello** and **Goodbye**. Both requests only consist of a
//! key (field **1**), both replies consist of a [ReplyResult] (field **1**) and a message text
//! (field **2**).
//!
//! # Example
//!
//! ```
//! # use lookaside::codec;
//! # use lookaside::message::{HelloReply, ReplyResult};
//! let reply = HelloReply::new(ReplyResult::Found, "Hello World");
//! let data = codec::serialize(&reply);
//!
//! assert_eq!(codec::deserialize::<HelloReply>(data).unwrap(), reply);
//! ```
use crate::codec::{CodecError, Field, FieldType, Message, Reader, Writer};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Describes a request which can be routed.
pub trait Request: Message + Send + Sync + 'static {
    /// The type of reply produced for this request.
    type Reply: Reply;

    /// Contains a short name of the request type, e.g. to be used within cache keys.
    const NAME: &'static str;
}

/// Describes a reply produced by routing a request.
pub trait Reply: Message + Clone + Send + Sync + 'static {
    /// Returns the result code of this reply.
    fn result(&self) -> ReplyResult;

    /// Creates a reply which only carries the given result code.
    fn from_result(result: ReplyResult) -> Self;
}

/// Describes a request which operates on a key.
pub trait Keyed {
    /// Returns the key of this request.
    fn key(&self) -> &str;
}

/// Enumerates the result codes of a reply.
///
/// The codes are stored as I16 values. Codes unknown to a reader are decoded as
/// [ReplyResult::Unknown] instead of being rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, Default)]
pub enum ReplyResult {
    /// No result is known (yet).
    #[default]
    Unknown = 0,
    /// The request was handled successfully.
    Ok = 1,
    /// The requested entity was found.
    Found = 2,
    /// The requested entity doesn't exist.
    NotFound = 3,
    /// A value has been stored.
    Stored = 4,
    /// A value has not been stored.
    NotStored = 5,
    /// A value has been deleted.
    Deleted = 6,
    /// The handling server reported an error.
    RemoteError = 7,
    /// The request timed out.
    Timeout = 8,
    /// The request failed locally.
    LocalError = 9,
}

impl ReplyResult {
    /// Determines if this result represents a failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ReplyResult::RemoteError | ReplyResult::Timeout | ReplyResult::LocalError
        )
    }
}

impl Field for ReplyResult {
    const FIELD_TYPE: FieldType = FieldType::I16;

    fn write(&self, writer: &mut Writer) {
        writer.write_i16(*self as i16);
    }

    fn read(reader: &mut Reader) -> Result<Self, CodecError> {
        let code = reader.read_i16()?;
        Ok(ReplyResult::from_i16(code).unwrap_or(ReplyResult::Unknown))
    }
}

const KEY_FIELD: i16 = 1;
const RESULT_FIELD: i16 = 1;
const MESSAGE_FIELD: i16 = 2;

fn write_key(writer: &mut Writer, key: &str) {
    writer.write_field_header(FieldType::Binary, KEY_FIELD);
    writer.write_binary(key.as_bytes());
    writer.write_stop();
}

fn read_key(reader: &mut Reader) -> Result<String, CodecError> {
    let mut key = String::new();
    loop {
        match reader.read_field_header()? {
            (FieldType::Stop, _) => return Ok(key),
            (field_type, KEY_FIELD) => key = reader.read(field_type)?,
            (field_type, _) => reader.skip(field_type)?,
        }
    }
}

fn write_result_and_message(writer: &mut Writer, result: ReplyResult, message: &str) {
    writer.write_field(RESULT_FIELD, &result);
    writer.write_field_header(FieldType::Binary, MESSAGE_FIELD);
    writer.write_binary(message.as_bytes());
    writer.write_stop();
}

fn read_result_and_message(reader: &mut Reader) -> Result<(ReplyResult, String), CodecError> {
    let mut result = ReplyResult::Unknown;
    let mut message = String::new();
    loop {
        match reader.read_field_header()? {
            (FieldType::Stop, _) => return Ok((result, message)),
            (field_type, RESULT_FIELD) => result = reader.read(field_type)?,
            (field_type, MESSAGE_FIELD) => message = reader.read(field_type)?,
            (field_type, _) => reader.skip(field_type)?,
        }
    }
}

/// Greets the entity identified by the given key.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct HelloRequest {
    /// Contains the key to greet.
    pub key: String,
}

impl HelloRequest {
    /// Creates a new request for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        HelloRequest { key: key.into() }
    }
}

impl Keyed for HelloRequest {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Message for HelloRequest {
    fn serialize(&self, writer: &mut Writer) {
        write_key(writer, &self.key);
    }

    fn deserialize(reader: &mut Reader) -> Result<Self, CodecError> {
        Ok(HelloRequest {
            key: read_key(reader)?,
        })
    }
}

impl Request for HelloRequest {
    type Reply = HelloReply;
    const NAME: &'static str = "hello";
}

/// Answers a [HelloRequest].
#[derive(Clone, Debug, PartialEq, Default)]
pub struct HelloReply {
    /// Contains the result code.
    pub result: ReplyResult,
    /// Contains the greeting.
    pub message: String,
}

impl HelloReply {
    /// Creates a new reply.
    pub fn new(result: ReplyResult, message: impl Into<String>) -> Self {
        HelloReply {
            result,
            message: message.into(),
        }
    }
}

impl Message for HelloReply {
    fn serialize(&self, writer: &mut Writer) {
        write_result_and_message(writer, self.result, &self.message);
    }

    fn deserialize(reader: &mut Reader) -> Result<Self, CodecError> {
        let (result, message) = read_result_and_message(reader)?;
        Ok(HelloReply { result, message })
    }
}

impl Reply for HelloReply {
    fn result(&self) -> ReplyResult {
        self.result
    }

    fn from_result(result: ReplyResult) -> Self {
        HelloReply::new(result, "")
    }
}

/// Says farewell to the entity identified by the given key.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct GoodbyeRequest {
    /// Contains the key to say goodbye to.
    pub key: String,
}

impl GoodbyeRequest {
    /// Creates a new request for the given key.
    pub fn new(key: impl Into<String>) -> Self {
        GoodbyeRequest { key: key.into() }
    }
}

impl Keyed for GoodbyeRequest {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Message for GoodbyeRequest {
    fn serialize(&self, writer: &mut Writer) {
        write_key(writer, &self.key);
    }

    fn deserialize(reader: &mut Reader) -> Result<Self, CodecError> {
        Ok(GoodbyeRequest {
            key: read_key(reader)?,
        })
    }
}

impl Request for GoodbyeRequest {
    type Reply = GoodbyeReply;
    const NAME: &'static str = "goodbye";
}

/// Answers a [GoodbyeRequest].
#[derive(Clone, Debug, PartialEq, Default)]
pub struct GoodbyeReply {
    /// Contains the result code.
    pub result: ReplyResult,
    /// Contains the farewell.
    pub message: String,
}

impl GoodbyeReply {
    /// Creates a new reply.
    pub fn new(result: ReplyResult, message: impl Into<String>) -> Self {
        GoodbyeReply {
            result,
            message: message.into(),
        }
    }
}

impl Message for GoodbyeReply {
    fn serialize(&self, writer: &mut Writer) {
        write_result_and_message(writer, self.result, &self.message);
    }

    fn deserialize(reader: &mut Reader) -> Result<Self, CodecError> {
        let (result, message) = read_result_and_message(reader)?;
        Ok(GoodbyeReply { result, message })
    }
}

impl Reply for GoodbyeReply {
    fn result(&self) -> ReplyResult {
        self.result
    }

    fn from_result(result: ReplyResult) -> Self {
        GoodbyeReply::new(result, "")
    }
}
