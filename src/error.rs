//! The error taxonomy. `ValidationError` reproduces a closed set of
//! codes one-for-one -- consumers switch on these for diagnostics and
//! test coverage, so codes are never merged even when two are raised
//! from the same function.
//!
//! OOM is orthogonal to validity and is its own marker type; every
//! allocating entry point threads it through rather than mixing it into
//! the validity code.

use thiserror::Error;

/// Returned by an allocating operation whose growth failed. Carries no
/// payload: the caller already knows what it was trying to allocate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct OomError;

impl std::fmt::Display for OomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "allocation failed")
    }
}
impl std::error::Error for OomError {}

/// The closed validity taxonomy.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ValidationError {
    #[error("signature contains an unknown type code")]
    UnknownTypecode,
    #[error("array type code 'a' is not followed by a complete element type")]
    MissingArrayElementType,
    #[error("signature is longer than 255 bytes")]
    SignatureTooLong,
    #[error("array nesting exceeds the maximum depth of 32")]
    ExceededMaxArrayRecursion,
    #[error("struct nesting exceeds the maximum depth of 32")]
    ExceededMaxStructRecursion,
    #[error("')' encountered without a matching '('")]
    StructEndedButNotStarted,
    #[error("'(' was never closed with a matching ')'")]
    StructStartedButNotEnded,
    #[error("struct has no fields ('()' is not a legal signature)")]
    StructHasNoFields,
    #[error("alignment padding bytes were not all NUL")]
    AlignmentPaddingNotNul,
    #[error("boolean value was not 0 or 1")]
    BooleanNotZeroOrOne,
    #[error("not enough data remaining to read the expected value")]
    NotEnoughData,
    #[error("message body contains more bytes than its signature accounts for")]
    TooMuchData,
    #[error("header declared an unrecognised byte-order byte")]
    BadByteOrder,
    #[error("header declared an unsupported protocol version")]
    BadProtocolVersion,
    #[error("header declared an unrecognised message type")]
    BadMessageType,
    #[error("header declared a zero (unset) serial in a transmitted message")]
    BadSerial,
    #[error("header fields array length is not plausible")]
    InsaneFieldsArrayLength,
    #[error("body length field is not plausible")]
    InsaneBodyLength,
    #[error("combined message length exceeds the protocol maximum")]
    MessageTooLong,
    #[error("unknown header field code (not an error; ignored)")]
    HeaderFieldCode,
    #[error("header field has a type other than the one its code requires")]
    HeaderFieldHasWrongType,
    #[error("a local-only interface name appeared on the wire")]
    UsesLocalInterface,
    #[error("a local-only object path appeared on the wire")]
    UsesLocalPath,
    #[error("a header field code appeared more than once")]
    HeaderFieldAppearsTwice,
    #[error("DESTINATION header field failed bus-name validation")]
    BadDestination,
    #[error("INTERFACE header field failed interface-name validation")]
    BadInterface,
    #[error("MEMBER header field failed member-name validation")]
    BadMember,
    #[error("ERROR_NAME header field failed error-name validation")]
    BadErrorName,
    #[error("SENDER header field failed bus-name validation")]
    BadSender,
    #[error("method call is missing a required PATH header field")]
    MissingPath,
    #[error("signal is missing a required INTERFACE header field")]
    MissingInterface,
    #[error("message is missing a required MEMBER header field")]
    MissingMember,
    #[error("error message is missing a required ERROR_NAME header field")]
    MissingErrorName,
    #[error("reply or error message is missing a required REPLY_SERIAL header field")]
    MissingReplySerial,
    #[error("string length prefix does not fit in the remaining bytes")]
    StringLengthOutOfBounds,
    #[error("array length prefix does not fit in the remaining bytes")]
    ArrayLengthOutOfBounds,
    #[error("array length exceeds the protocol maximum array size")]
    ArrayLengthExceedsMax,
    #[error("object path failed the path syntax rule")]
    BadPath,
    #[error("signature length prefix does not fit in the remaining bytes")]
    SignatureLengthOutOfBounds,
    #[error("signature failed grammar validation")]
    BadSignature,
    #[error("string bytes were not valid UTF-8")]
    BadUtf8InString,
    #[error("array's trailing cursor position did not equal start + declared length")]
    ArrayLengthIncorrect,
    #[error("variant's inline signature length prefix is out of bounds")]
    VariantSignatureLengthOutOfBounds,
    #[error("variant's inline signature failed grammar validation")]
    VariantSignatureBad,
    #[error("variant's inline signature was empty")]
    VariantSignatureEmpty,
    #[error("variant's inline signature specifies more than one complete type")]
    VariantSignatureSpecifiesMultipleValues,
    #[error("variant's inline signature was missing its trailing NUL")]
    VariantSignatureMissingNul,
    #[error("string value was missing its trailing NUL")]
    StringMissingNul,
    #[error("signature value was missing its trailing NUL")]
    SignatureMissingNul,
}

/// Errors raised while writing a value into a message body.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MarshalError {
    #[error("out of memory while marshalling")]
    Oom(#[from] OomError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("writer's type position expected {expected:?} but caller supplied {found:?}")]
    TypeMismatch { expected: u8, found: u8 },
    #[error("attempted to write into a locked message")]
    MessageLocked,
    #[error("attempted to marshal a message with the invalid/unspecified message type")]
    InvalidMessageType,
}

/// Errors raised while reading a value out of a message body.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq, Hash)]
pub enum UnmarshalError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("reader is positioned at the end of its current container")]
    EndOfContainer,
    #[error("caller's requested type does not match the type at the cursor")]
    WrongType,
    #[error("attempted to recurse into a non-container type")]
    NotAContainer,
}

/// Top-level error type for operations that cross more than one
/// component (message construction, loading).
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Error {
    #[error("out of memory")]
    Oom(#[from] OomError),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Unmarshal(#[from] UnmarshalError),
    #[error("message is locked and cannot be modified")]
    MessageLocked,
    #[error("a serial was already assigned to this message")]
    SerialAlreadyAssigned,
    #[error("message loader is corrupted and will not yield further messages")]
    LoaderCorrupted,
}
