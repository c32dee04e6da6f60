//! The closed set of argument kinds and their values.

use crate::Error;
use crate::Fixed;
use crate::Handle;
use crate::Result;
use crate::pad4;

/// Identifier of a protocol object within one connection.
///
/// Id 0 is the null object and is only valid for optional references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId(0);
    /// The display root. Reserved for the lifetime of every connection.
    pub const DISPLAY: ObjectId = ObjectId(1);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type slot of a message signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Uint,
    Int,
    Fixed,
    Object,
    OptionalObject,
    NewId,
    String,
    OptionalString,
    Array,
    OptionalArray,
    Handle,
}

impl ArgKind {
    /// The character used for this kind in signature strings.
    pub fn code(self) -> &'static str {
        match self {
            ArgKind::Uint => "u",
            ArgKind::Int => "i",
            ArgKind::Fixed => "f",
            ArgKind::Object => "o",
            ArgKind::OptionalObject => "?o",
            ArgKind::NewId => "n",
            ArgKind::String => "s",
            ArgKind::OptionalString => "?s",
            ArgKind::Array => "a",
            ArgKind::OptionalArray => "?a",
            ArgKind::Handle => "h",
        }
    }
}

/// Parses a signature string such as `"u?sn"`.
///
/// A leading `?` marks the next object, string or array slot as optional.
/// Version prefixes (leading digits) are skipped.
pub fn parse_signature(sig: &str) -> Result<Vec<ArgKind>> {
    let mut kinds = Vec::with_capacity(sig.len());
    let mut optional = false;
    for c in sig.chars().skip_while(|c| c.is_ascii_digit()) {
        let kind = match (c, optional) {
            ('?', false) => {
                optional = true;
                continue;
            }
            ('u', false) => ArgKind::Uint,
            ('i', false) => ArgKind::Int,
            ('f', false) => ArgKind::Fixed,
            ('n', false) => ArgKind::NewId,
            ('h', false) => ArgKind::Handle,
            ('o', false) => ArgKind::Object,
            ('o', true) => ArgKind::OptionalObject,
            ('s', false) => ArgKind::String,
            ('s', true) => ArgKind::OptionalString,
            ('a', false) => ArgKind::Array,
            ('a', true) => ArgKind::OptionalArray,
            _ => return Err(Error::InvalidSignature(sig.to_string())),
        };
        optional = false;
        kinds.push(kind);
    }
    if optional {
        return Err(Error::InvalidSignature(sig.to_string()));
    }
    Ok(kinds)
}

/// A typed argument value.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Uint(u32),
    Int(i32),
    Fixed(Fixed),
    Object(ObjectId),
    OptionalObject(Option<ObjectId>),
    /// Id of the object being created. A constructor marshals `NewId(0)` as
    /// a placeholder that the connection fills in.
    NewId(u32),
    String(String),
    OptionalString(Option<String>),
    Array(Vec<u8>),
    OptionalArray(Option<Vec<u8>>),
    Handle(Handle),
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Uint(_) => ArgKind::Uint,
            Arg::Int(_) => ArgKind::Int,
            Arg::Fixed(_) => ArgKind::Fixed,
            Arg::Object(_) => ArgKind::Object,
            Arg::OptionalObject(_) => ArgKind::OptionalObject,
            Arg::NewId(_) => ArgKind::NewId,
            Arg::String(_) => ArgKind::String,
            Arg::OptionalString(_) => ArgKind::OptionalString,
            Arg::Array(_) => ArgKind::Array,
            Arg::OptionalArray(_) => ArgKind::OptionalArray,
            Arg::Handle(_) => ArgKind::Handle,
        }
    }

    /// Number of bytes this argument occupies inside a frame.
    pub fn wire_size(&self) -> usize {
        match self {
            Arg::Uint(_)
            | Arg::Int(_)
            | Arg::Fixed(_)
            | Arg::Object(_)
            | Arg::OptionalObject(_)
            | Arg::NewId(_) => 4,
            Arg::String(s) => 4 + pad4(s.len() + 1),
            Arg::OptionalString(Some(s)) => 4 + pad4(s.len() + 1),
            Arg::OptionalString(None) => 4,
            Arg::Array(a) => 4 + pad4(a.len()),
            Arg::OptionalArray(Some(a)) => 4 + pad4(a.len()),
            Arg::OptionalArray(None) => 4,
            Arg::Handle(_) => 0,
        }
    }

    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Arg::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Arg::Object(id) => Some(*id),
            Arg::OptionalObject(id) => *id,
            _ => None,
        }
    }

    pub fn as_new_id(&self) -> Option<ObjectId> {
        match self {
            Arg::NewId(id) => Some(ObjectId(*id)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(s) => Some(s),
            Arg::OptionalString(s) => s.as_deref(),
            _ => None,
        }
    }
}
