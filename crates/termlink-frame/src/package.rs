use bytes::Bytes;

/// Kinds of packages that can travel over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PackageKind {
    SingleString = 0,
    SingleInt32 = 1,
    Bytes = 2,
    StringList = 3,
}

impl PackageKind {
    /// Parse a wire kind byte. Returns `None` for bytes outside the known set.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::SingleString),
            1 => Some(Self::SingleInt32),
            2 => Some(Self::Bytes),
            3 => Some(Self::StringList),
            _ => None,
        }
    }

    /// The wire byte for this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Human-readable kind name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::SingleString => "single-string",
            Self::SingleInt32 => "single-int32",
            Self::Bytes => "bytes",
            Self::StringList => "string-list",
        }
    }
}

/// Kind-dependent package content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    SingleString(String),
    SingleInt32(i32),
    Bytes(Bytes),
    StringList(Vec<String>),
}

impl Payload {
    /// The wire kind of this payload.
    pub fn kind(&self) -> PackageKind {
        match self {
            Self::SingleString(_) => PackageKind::SingleString,
            Self::SingleInt32(_) => PackageKind::SingleInt32,
            Self::Bytes(_) => PackageKind::Bytes,
            Self::StringList(_) => PackageKind::StringList,
        }
    }
}

/// One logical message: a short identifying name tag plus typed content.
///
/// Packages are ephemeral — built by the sender immediately before encoding
/// and by the assembler immediately before dispatch. Name uniqueness is a
/// convention between peers, not enforced here.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub payload: Payload,
}

impl Package {
    /// Create a package from a name and payload.
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// A single-string package.
    pub fn single_string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, Payload::SingleString(value.into()))
    }

    /// A single-int32 package.
    pub fn single_int32(name: impl Into<String>, value: i32) -> Self {
        Self::new(name, Payload::SingleInt32(value))
    }

    /// A raw-bytes package. The data may be empty.
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(name, Payload::Bytes(data.into()))
    }

    /// A string-list package. The list may be empty or contain empty strings.
    pub fn string_list(name: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(name, Payload::StringList(values))
    }

    /// The wire kind of this package.
    pub fn kind(&self) -> PackageKind {
        self.payload.kind()
    }
}
