// name of module: tbf_catalog_module

/*
In-memory side of a TBF1 file.

A `Catalog` is the ordered list of tensors a file holds. Order matters: it is
both the header order and the order the raw blocks are laid out in the data
section. Each entry knows its absolute `byte_offset`, which is only known once
every header record has been measured, hence the two passes in
`Catalog::build`:

    Pass 1 (measure): resolve dtype, validate name/rank/dims, derive the byte
                      length, accumulate offsets relative to the data section
                      and the total header length.
    Pass 2 (place):   dataStart = 12 + header length; add it to every relative
                      offset.

Header record layout, per entry:

    nameLen u16 | name | dtype u8 | rank u8 | dims u32 * rank | offset u64 | byteLength u64
*/

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::tbf_dtype_module::{DtypeTag, NativeDtype};
use crate::tbf_error_module::{Result, TbfError};

/// The four bytes every TBF1 file starts with. The last byte is the format
/// version.
pub const TBF_MAGIC: [u8; 4] = *b"TBF1";

/// magic (4) + entryCount (8)
pub const PREAMBLE_LEN: u64 = 12;

/// Smallest possible header record: empty name, rank 0.
pub const MIN_RECORD_LEN: u64 = 2 + 1 + 1 + 8 + 8;

pub const MAX_NAME_LEN: usize = u16::MAX as usize;
pub const MAX_RANK: usize = u8::MAX as usize;

/// Length in bytes of one header record.
pub fn record_len(name_len: usize, rank: usize) -> u64 {
    (2 + name_len + 1 + 1 + 4 * rank + 8 + 8) as u64
}

/// `item_size(dtype) * product(shape)`; the empty product is 1, so a scalar
/// occupies one item.
///
/// # Returns
/// * `None` if the product does not fit in a u64
pub fn expected_byte_length(dtype: DtypeTag, shape: &[u32]) -> Option<u64> {
    shape
        .iter()
        .try_fold(dtype.item_size() as u64, |acc, &dim| acc.checked_mul(dim as u64))
}

/// One tensor as handed over by a provider, before it has a dtype tag or an
/// offset.
#[derive(Debug, Clone)]
pub struct SourceTensor<'a> {
    pub name: String,
    pub dtype: NativeDtype,
    pub shape: Vec<usize>,
    pub data: Cow<'a, [u8]>,
}

macro_rules! source_from_slice {
    ($fn_name:ident, $t:ty, $native:expr, $write:ident) => {
        /// Serialises a row-major slice to little-endian bytes.
        pub fn $fn_name(name: impl Into<String>, shape: Vec<usize>, values: &[$t]) -> SourceTensor<'static> {
            let mut data = vec![0u8; values.len() * std::mem::size_of::<$t>()];
            LittleEndian::$write(values, &mut data);
            SourceTensor::new(name, $native, shape, data)
        }
    };
}

impl<'a> SourceTensor<'a> {
    pub fn new(
        name: impl Into<String>,
        dtype: NativeDtype,
        shape: Vec<usize>,
        data: impl Into<Cow<'a, [u8]>>,
    ) -> Self {
        SourceTensor {
            name: name.into(),
            dtype,
            shape,
            data: data.into(),
        }
    }

    source_from_slice!(from_f32, f32, NativeDtype::Float32, write_f32_into);
    source_from_slice!(from_f64, f64, NativeDtype::Float64, write_f64_into);
    source_from_slice!(from_i64, i64, NativeDtype::Int64, write_i64_into);
    source_from_slice!(from_i32, i32, NativeDtype::Int32, write_i32_into);

    /// Serialises half-precision values to little-endian bytes.
    pub fn from_f16(name: impl Into<String>, shape: Vec<usize>, values: &[half::f16]) -> SourceTensor<'static> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        SourceTensor::new(name, NativeDtype::Float16, shape, data)
    }

    pub fn from_u8(name: impl Into<String>, shape: Vec<usize>, values: &'a [u8]) -> SourceTensor<'a> {
        SourceTensor::new(name, NativeDtype::UInt8, shape, values)
    }
}

/// Metadata of one entry: everything in its header record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorHeader {
    pub name: String,
    pub dtype: DtypeTag,
    pub shape: Vec<u32>,
    /// Absolute position of the tensor's data from the start of the file.
    pub byte_offset: u64,
    pub byte_length: u64,
}

impl TensorHeader {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements; 1 for a scalar.
    pub fn numel(&self) -> u64 {
        self.shape.iter().map(|&d| d as u64).product()
    }

    /// Row-major strides in elements (last dimension fastest).
    pub fn strides(&self) -> Vec<u64> {
        let mut strides = vec![0u64; self.shape.len()];
        let mut step = 1u64;
        for (stride, &dim) in strides.iter_mut().zip(&self.shape).rev() {
            *stride = step;
            step = step.saturating_mul(dim as u64);
        }
        strides
    }

    /// Size of this entry's header record.
    pub fn record_len(&self) -> u64 {
        record_len(self.name.len(), self.shape.len())
    }
}

/// One named tensor: its header plus exactly `byte_length` bytes of data,
/// either borrowed from the backing buffer or owned.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorEntry<'a> {
    pub header: TensorHeader,
    pub data: Cow<'a, [u8]>,
}

impl<'a> TensorEntry<'a> {
    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn dtype(&self) -> DtypeTag {
        self.header.dtype
    }

    pub fn shape(&self) -> &[u32] {
        &self.header.shape
    }

    pub fn byte_offset(&self) -> u64 {
        self.header.byte_offset
    }

    pub fn byte_length(&self) -> u64 {
        self.header.byte_length
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reads the elements widened to f32. Accepts f32, f16 and f64 tensors.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let data = self.data();
        match self.dtype() {
            DtypeTag::Float32 => Ok(data.chunks_exact(4).map(LittleEndian::read_f32).collect()),
            DtypeTag::Float16 => Ok(data
                .chunks_exact(2)
                .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect()),
            DtypeTag::Float64 => Ok(data
                .chunks_exact(8)
                .map(|b| LittleEndian::read_f64(b) as f32)
                .collect()),
            actual => Err(TbfError::DtypeMismatch {
                name: self.name().to_string(),
                actual,
                requested: "f32",
            }),
        }
    }

    /// Reads the elements widened to i64. Accepts i64, i32 and u8 tensors.
    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        let data = self.data();
        match self.dtype() {
            DtypeTag::Int64 => Ok(data.chunks_exact(8).map(LittleEndian::read_i64).collect()),
            DtypeTag::Int32 => Ok(data
                .chunks_exact(4)
                .map(|b| LittleEndian::read_i32(b) as i64)
                .collect()),
            DtypeTag::UInt8 => Ok(data.iter().map(|&b| b as i64).collect()),
            actual => Err(TbfError::DtypeMismatch {
                name: self.name().to_string(),
                actual,
                requested: "i64",
            }),
        }
    }

    pub fn into_owned(self) -> TensorEntry<'static> {
        TensorEntry {
            header: self.header,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

/// Ordered collection of tensors backing one TBF1 file.
///
/// Names are unique: both the builder and the decoder refuse duplicates, so
/// `lookup` is unambiguous.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog<'a> {
    entries: Vec<TensorEntry<'a>>,
    index: HashMap<String, usize>,
}

impl<'a> Catalog<'a> {
    /// Builds a catalog from provider tensors, assigning absolute offsets.
    ///
    /// Nothing is written here; any error leaves the caller with no output at
    /// all.
    ///
    /// # Errors
    /// * `UnsupportedDtype` if a native type has no TBF1 code
    /// * `MalformedEntry` for an over-long name, rank > 255, a dimension
    ///   beyond u32 or a duplicate name
    /// * `SizeMismatch` if the buffer length disagrees with dtype and shape,
    ///   with `expected: u64::MAX` when that product overflows
    pub fn build<I>(source: I) -> Result<Self>
    where
        I: IntoIterator<Item = SourceTensor<'a>>,
    {
        // Pass 1: measure
        let mut measured: Vec<(TensorHeader, Cow<'a, [u8]>)> = Vec::new();
        let mut header_len = 0u64;
        let mut relative = 0u64;

        for (index, src) in source.into_iter().enumerate() {
            let position = PREAMBLE_LEN + header_len;
            let malformed = |reason: String| TbfError::MalformedEntry {
                index,
                position,
                reason,
            };

            let dtype = DtypeTag::from_native(&src.dtype).ok_or_else(|| TbfError::UnsupportedDtype {
                index,
                position,
                name: src.name.clone(),
                dtype: src.dtype.to_string(),
            })?;

            if src.name.len() > MAX_NAME_LEN {
                return Err(malformed(format!(
                    "name is {} bytes of UTF-8, limit is {}",
                    src.name.len(),
                    MAX_NAME_LEN
                )));
            }
            if src.shape.len() > MAX_RANK {
                return Err(malformed(format!(
                    "rank {} exceeds {} for '{}'",
                    src.shape.len(),
                    MAX_RANK,
                    src.name
                )));
            }

            let shape = src
                .shape
                .iter()
                .map(|&dim| u32::try_from(dim))
                .collect::<std::result::Result<Vec<u32>, _>>()
                .map_err(|_| malformed(format!("dimension of '{}' does not fit in u32", src.name)))?;

            // an overflowing product reports u64::MAX as the expected length
            let byte_length = expected_byte_length(dtype, &shape).unwrap_or(u64::MAX);
            if src.data.len() as u64 != byte_length {
                return Err(TbfError::SizeMismatch {
                    index,
                    name: src.name,
                    expected: byte_length,
                    actual: src.data.len() as u64,
                });
            }

            let header = TensorHeader {
                name: src.name,
                dtype,
                shape,
                byte_offset: relative,
                byte_length,
            };
            header_len += header.record_len();
            relative = relative
                .checked_add(byte_length)
                .ok_or_else(|| malformed("data section size overflows u64".to_string()))?;
            measured.push((header, src.data));
        }

        // Pass 2: place
        let data_start = PREAMBLE_LEN + header_len;
        let entries = measured
            .into_iter()
            .map(|(mut header, data)| {
                header.byte_offset += data_start;
                TensorEntry { header, data }
            })
            .collect();

        Self::from_entries(entries)
    }

    /// Wraps already-placed entries, indexing them by name.
    ///
    /// # Errors
    /// * `MalformedEntry` naming the second occurrence of a duplicate name
    pub fn from_entries(entries: Vec<TensorEntry<'a>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(entries.len());
        let mut position = PREAMBLE_LEN;
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.name().to_string(), i).is_some() {
                return Err(TbfError::MalformedEntry {
                    index: i,
                    position,
                    reason: format!("duplicate tensor name '{}'", entry.name()),
                });
            }
            position += entry.header.record_len();
        }
        Ok(Catalog { entries, index })
    }

    /// For entries whose names were already checked for uniqueness.
    pub(crate) fn from_unique_entries(entries: Vec<TensorEntry<'a>>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name().to_string(), i))
            .collect();
        Catalog { entries, index }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TensorEntry<'a>] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorEntry<'a>> {
        self.entries.iter()
    }

    pub fn headers(&self) -> impl Iterator<Item = &TensorHeader> {
        self.entries.iter().map(|e| &e.header)
    }

    /// Absolute offset where the data section begins, derived purely from the
    /// header records.
    pub fn data_start(&self) -> u64 {
        PREAMBLE_LEN + self.headers().map(TensorHeader::record_len).sum::<u64>()
    }

    /// Total bytes of tensor data, as declared by the headers. Saturates at
    /// `u64::MAX` for a hand-assembled catalog whose lengths cannot add up.
    pub fn data_len(&self) -> u64 {
        self.headers()
            .fold(0u64, |acc, h| acc.saturating_add(h.byte_length))
    }

    pub fn get(&self, name: &str) -> Option<&TensorEntry<'a>> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Fetches one tensor by name.
    ///
    /// # Errors
    /// * `NotFound` if no entry carries that name
    pub fn lookup(&self, name: &str) -> Result<&TensorEntry<'a>> {
        self.get(name).ok_or_else(|| TbfError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn into_owned(self) -> Catalog<'static> {
        Catalog {
            entries: self.entries.into_iter().map(TensorEntry::into_owned).collect(),
            index: self.index,
        }
    }
}

impl<'c, 'a> IntoIterator for &'c Catalog<'a> {
    type Item = &'c TensorEntry<'a>;
    type IntoIter = std::slice::Iter<'c, TensorEntry<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Tensor listing, one line per entry.
impl fmt::Display for Catalog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(40))?;
        writeln!(f, "TBF file contains {} tensors:", self.len())?;
        for h in self.headers() {
            let dims: Vec<String> = h.shape.iter().map(u32::to_string).collect();
            writeln!(
                f,
                "{:<50} (dtype={}, rank={}, nbytes={:>10}, offset={:>10}, shape=({}))",
                h.name,
                h.dtype,
                h.rank(),
                h.byte_length,
                h.byte_offset,
                dims.join(", ")
            )?;
        }
        write!(f, "{}", "=".repeat(40))
    }
}
