use std::fmt;

use crate::AbortionKind;

/// Status codes carried by [`RpcError::Status`].
///
/// Values match the gRPC status codes so they can be put on the wire as-is.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl ErrorCode {
    /// Convert from a u32 wire value.
    pub fn from_u32(val: u32) -> Option<Self> {
        Some(match val {
            0 => ErrorCode::Ok,
            1 => ErrorCode::Cancelled,
            2 => ErrorCode::Unknown,
            3 => ErrorCode::InvalidArgument,
            4 => ErrorCode::DeadlineExceeded,
            5 => ErrorCode::NotFound,
            6 => ErrorCode::AlreadyExists,
            7 => ErrorCode::PermissionDenied,
            8 => ErrorCode::ResourceExhausted,
            9 => ErrorCode::FailedPrecondition,
            10 => ErrorCode::Aborted,
            11 => ErrorCode::OutOfRange,
            12 => ErrorCode::Unimplemented,
            13 => ErrorCode::Internal,
            14 => ErrorCode::Unavailable,
            15 => ErrorCode::DataLoss,
            16 => ErrorCode::Unauthenticated,
            _ => return None,
        })
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Human-readable description of this code.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Unknown => "unknown",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::DeadlineExceeded => "deadline exceeded",
            ErrorCode::NotFound => "not found",
            ErrorCode::AlreadyExists => "already exists",
            ErrorCode::PermissionDenied => "permission denied",
            ErrorCode::ResourceExhausted => "resource exhausted",
            ErrorCode::FailedPrecondition => "failed precondition",
            ErrorCode::Aborted => "aborted",
            ErrorCode::OutOfRange => "out of range",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Internal => "internal",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::DataLoss => "data loss",
            ErrorCode::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u32())
    }
}

/// A value could not be serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeError {
    pub message: String,
    /// Set when the value was not of the type the serializer expects.
    pub expected: Option<&'static str>,
}

impl EncodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected: None,
        }
    }

    /// The erased message handed to a serializer was of another type.
    pub fn unexpected_type(expected: &'static str) -> Self {
        Self {
            message: "message has an unexpected type".to_string(),
            expected: Some(expected),
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expected {
            Some(expected) => write!(f, "encode error: {} (expected {})", self.message, expected),
            None => write!(f, "encode error: {}", self.message),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Bytes could not be deserialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub message: String,
    /// The type the deserializer was producing, when known.
    pub expected: Option<&'static str>,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected: None,
        }
    }

    pub fn for_type(expected: &'static str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected: Some(expected),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expected {
            Some(expected) => write!(f, "decode error: {} (decoding {})", self.message, expected),
            None => write!(f, "decode error: {}", self.message),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors produced while running a method implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The call finished with a non-OK status.
    Status { code: ErrorCode, message: String },
    /// A response or request could not be serialized.
    Encode(EncodeError),
    /// A response or request could not be deserialized.
    Decode(DecodeError),
    /// The call was aborted before it completed.
    Aborted(AbortionKind),
}

impl RpcError {
    pub fn status(code: ErrorCode, message: impl Into<String>) -> Self {
        RpcError::Status {
            code,
            message: message.into(),
        }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::status(ErrorCode::Unimplemented, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::status(ErrorCode::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::status(ErrorCode::Internal, message)
    }

    /// The status code this error maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            RpcError::Status { code, .. } => *code,
            RpcError::Encode(_) => ErrorCode::Internal,
            RpcError::Decode(_) => ErrorCode::InvalidArgument,
            RpcError::Aborted(AbortionKind::Cancelled) => ErrorCode::Cancelled,
            RpcError::Aborted(AbortionKind::Expired) => ErrorCode::DeadlineExceeded,
            RpcError::Aborted(AbortionKind::NetworkFailure) => ErrorCode::Unavailable,
            RpcError::Aborted(_) => ErrorCode::Aborted,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Status { code, message } => write!(f, "{}: {}", code, message),
            RpcError::Encode(e) => write!(f, "{}", e),
            RpcError::Decode(e) => write!(f, "{}", e),
            RpcError::Aborted(kind) => write!(f, "call aborted: {}", kind),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Encode(e) => Some(e),
            RpcError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodeError> for RpcError {
    fn from(e: EncodeError) -> Self {
        RpcError::Encode(e)
    }
}

impl From<DecodeError> for RpcError {
    fn from(e: DecodeError) -> Self {
        RpcError::Decode(e)
    }
}
