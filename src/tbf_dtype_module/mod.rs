// name of module: tbf_dtype_module

/*
TBF1 element types.

The numeric codes are written into every header record, so they are part of
the file format. Adding a code means bumping the version byte of the magic
("TBF1" -> "TBF2"); existing codes are never renumbered or reused.

| Code | Element                 | Item size |
|------|-------------------------|-----------|
| 1    | 32-bit IEEE float       | 4         |
| 2    | 16-bit float            | 2         |
| 3    | 64-bit IEEE float       | 8         |
| 4    | 64-bit signed integer   | 8         |
| 5    | 32-bit signed integer   | 4         |
| 6    | 8-bit unsigned integer  | 1         |
*/

use std::fmt;

/// Wire-level element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DtypeTag {
    Float32 = 1,
    Float16 = 2,
    Float64 = 3,
    Int64 = 4,
    Int32 = 5,
    UInt8 = 6,
}

impl DtypeTag {
    /// All tags in code order.
    pub const ALL: [DtypeTag; 6] = [
        DtypeTag::Float32,
        DtypeTag::Float16,
        DtypeTag::Float64,
        DtypeTag::Int64,
        DtypeTag::Int32,
        DtypeTag::UInt8,
    ];

    /// Converts the raw dtype byte of a header record.
    ///
    /// # Returns
    /// * `None` if the code has no meaning in this format version
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DtypeTag::Float32),
            2 => Some(DtypeTag::Float16),
            3 => Some(DtypeTag::Float64),
            4 => Some(DtypeTag::Int64),
            5 => Some(DtypeTag::Int32),
            6 => Some(DtypeTag::UInt8),
            _ => None,
        }
    }

    /// The byte written into the header record.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Size in bytes of one element.
    pub const fn item_size(self) -> usize {
        match self {
            DtypeTag::UInt8 => 1,
            DtypeTag::Float16 => 2,
            DtypeTag::Float32 | DtypeTag::Int32 => 4,
            DtypeTag::Float64 | DtypeTag::Int64 => 8,
        }
    }

    /// Maps a provider element type onto its wire tag.
    ///
    /// # Returns
    /// * `None` when the native type has no TBF1 representation
    pub fn from_native(native: &NativeDtype) -> Option<Self> {
        match native {
            NativeDtype::Float32 => Some(DtypeTag::Float32),
            NativeDtype::Float16 => Some(DtypeTag::Float16),
            NativeDtype::Float64 => Some(DtypeTag::Float64),
            NativeDtype::Int64 => Some(DtypeTag::Int64),
            NativeDtype::Int32 => Some(DtypeTag::Int32),
            NativeDtype::UInt8 => Some(DtypeTag::UInt8),
            _ => None,
        }
    }

    /// Short lowercase label used in listings.
    pub const fn as_str(self) -> &'static str {
        match self {
            DtypeTag::Float32 => "f32",
            DtypeTag::Float16 => "f16",
            DtypeTag::Float64 => "f64",
            DtypeTag::Int64 => "i64",
            DtypeTag::Int32 => "i32",
            DtypeTag::UInt8 => "u8",
        }
    }
}

impl fmt::Display for DtypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element type as reported by the tensor provider.
///
/// This is wider than [`DtypeTag`]: a framework can hand over tensors whose
/// element type has no TBF1 code, and the catalog builder must be able to
/// name that type when it refuses the tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeDtype {
    Float32,
    Float16,
    Float64,
    Int64,
    Int32,
    UInt8,
    BFloat16,
    Int8,
    Int16,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    Complex64,
    /// Anything else, by the provider's own name for it.
    Other(String),
}

impl fmt::Display for NativeDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NativeDtype::Float32 => "float32",
            NativeDtype::Float16 => "float16",
            NativeDtype::Float64 => "float64",
            NativeDtype::Int64 => "int64",
            NativeDtype::Int32 => "int32",
            NativeDtype::UInt8 => "uint8",
            NativeDtype::BFloat16 => "bfloat16",
            NativeDtype::Int8 => "int8",
            NativeDtype::Int16 => "int16",
            NativeDtype::UInt16 => "uint16",
            NativeDtype::UInt32 => "uint32",
            NativeDtype::UInt64 => "uint64",
            NativeDtype::Bool => "bool",
            NativeDtype::Complex64 => "complex64",
            NativeDtype::Other(name) => name.as_str(),
        };
        f.write_str(label)
    }
}

impl From<DtypeTag> for NativeDtype {
    fn from(tag: DtypeTag) -> Self {
        match tag {
            DtypeTag::Float32 => NativeDtype::Float32,
            DtypeTag::Float16 => NativeDtype::Float16,
            DtypeTag::Float64 => NativeDtype::Float64,
            DtypeTag::Int64 => NativeDtype::Int64,
            DtypeTag::Int32 => NativeDtype::Int32,
            DtypeTag::UInt8 => NativeDtype::UInt8,
        }
    }
}
