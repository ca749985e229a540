use std::fmt;

/// Streaming shape of an RPC method.
///
/// The first half of each name describes the request side, the second half
/// the response side.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Single request, single response
    UnaryUnary = 0,
    /// Single request, stream of responses
    UnaryStream = 1,
    /// Stream of requests, single response
    StreamUnary = 2,
    /// Stream of requests, stream of responses
    StreamStream = 3,
}

impl Cardinality {
    /// All four cardinalities, in wire-code order.
    pub const ALL: [Cardinality; 4] = [
        Cardinality::UnaryUnary,
        Cardinality::UnaryStream,
        Cardinality::StreamUnary,
        Cardinality::StreamStream,
    ];

    /// Convert from a u32 wire value.
    /// Returns None if the value doesn't match a known cardinality.
    pub fn from_u32(val: u32) -> Option<Self> {
        Some(match val {
            0 => Cardinality::UnaryUnary,
            1 => Cardinality::UnaryStream,
            2 => Cardinality::StreamUnary,
            3 => Cardinality::StreamStream,
            _ => return None,
        })
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether the caller sends a sequence of requests.
    pub fn has_streaming_request(self) -> bool {
        matches!(self, Cardinality::StreamUnary | Cardinality::StreamStream)
    }

    /// Whether the service answers with a sequence of responses.
    pub fn has_streaming_response(self) -> bool {
        matches!(self, Cardinality::UnaryStream | Cardinality::StreamStream)
    }

    /// Short kebab-case name.
    pub fn name(self) -> &'static str {
        match self {
            Cardinality::UnaryUnary => "unary-unary",
            Cardinality::UnaryStream => "unary-stream",
            Cardinality::StreamUnary => "stream-unary",
            Cardinality::StreamStream => "stream-stream",
        }
    }
}

impl TryFrom<u32> for Cardinality {
    type Error = UnknownCardinality;

    fn try_from(val: u32) -> Result<Self, Self::Error> {
        Cardinality::from_u32(val).ok_or(UnknownCardinality(val))
    }
}

impl From<Cardinality> for u32 {
    fn from(cardinality: Cardinality) -> u32 {
        cardinality.as_u32()
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error when converting from an unknown cardinality code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCardinality(pub u32);

impl fmt::Display for UnknownCardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown cardinality code: {}", self.0)
    }
}

impl std::error::Error for UnknownCardinality {}
