// name of module: tbf_decoder_module

/*
Reading TBF1 bytes back into a Catalog.

All header records are parsed and cross-checked before a single data byte is
touched:

1. magic is "TBF1"
2. entry count is plausible for the bytes that follow
3. each record parses (UTF-8 name, known dtype code)
4. byteLength == itemSize * product(dims); offsets start at dataStart and are
   contiguous; no block runs past the end of the buffer

Only then are data slices handed out, borrowed straight from the input (or
from the memory map, for `TbfFile`).
*/

use std::borrow::Cow;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::tbf_catalog_module::{
    expected_byte_length, Catalog, TensorEntry, TensorHeader, MIN_RECORD_LEN, PREAMBLE_LEN, TBF_MAGIC,
};
use crate::tbf_dtype_module::DtypeTag;
use crate::tbf_error_module::{Result, TbfError};

/// Bounds-checked little-endian cursor over the header section.
struct HeaderReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        HeaderReader { bytes, pos: 0 }
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize, context: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(TbfError::Truncated {
                position: self.position(),
                needed: n as u64,
                available: self.remaining() as u64,
                context: context.to_string(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self, context: &str) -> Result<u8> {
        Ok(self.take(1, context)?[0])
    }

    fn read_u16(&mut self, context: &str) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2, context)?))
    }

    fn read_u32(&mut self, context: &str) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4, context)?))
    }

    fn read_u64(&mut self, context: &str) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8, context)?))
    }
}

fn check_magic(bytes: &[u8]) -> Result<()> {
    let found = &bytes[..bytes.len().min(TBF_MAGIC.len())];
    if found != &TBF_MAGIC[..found.len()] {
        return Err(TbfError::BadMagic { found: found.to_vec() });
    }
    if found.len() < TBF_MAGIC.len() {
        return Err(TbfError::Truncated {
            position: 0,
            needed: TBF_MAGIC.len() as u64,
            available: found.len() as u64,
            context: "magic".to_string(),
        });
    }
    Ok(())
}

fn read_record(reader: &mut HeaderReader<'_>, index: usize) -> Result<TensorHeader> {
    let record_pos = reader.position();
    let name_len = reader.read_u16("name length")? as usize;
    let name_pos = reader.position();
    let name_bytes = reader.take(name_len, "tensor name")?;
    let name = std::str::from_utf8(name_bytes)
        .map_err(|e| TbfError::MalformedEntry {
            index,
            position: name_pos,
            reason: format!("name is not valid UTF-8: {e}"),
        })?
        .to_string();

    let code = reader.read_u8("dtype")?;
    let dtype = DtypeTag::from_code(code).ok_or_else(|| TbfError::UnsupportedDtype {
        index,
        position: record_pos,
        name: name.clone(),
        dtype: format!("code {code}"),
    })?;

    let rank = reader.read_u8("rank")? as usize;
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(reader.read_u32("dimension")?);
    }

    let byte_offset = reader.read_u64("data offset")?;
    let byte_length = reader.read_u64("byte length")?;

    Ok(TensorHeader {
        name,
        dtype,
        shape,
        byte_offset,
        byte_length,
    })
}

/// Steps 1-4: parses and validates every header record without reading any
/// tensor data.
///
/// # Errors
/// * `BadMagic` if the buffer does not start with "TBF1"
/// * `Truncated` if the header runs past the buffer, the entry count is
///   implausible, or a data block ends past the buffer
/// * `MalformedEntry` for a non-UTF-8 or duplicate name
/// * `UnsupportedDtype` for an unknown dtype code, with the record's index and
///   position
/// * `SizeMismatch` when the stored byte length disagrees with dtype and shape
///   (`expected: u64::MAX` if that product overflows)
/// * `OffsetIntegrity` for a gap or overlap between blocks
pub fn parse_headers(bytes: &[u8]) -> Result<Vec<TensorHeader>> {
    check_magic(bytes)?;
    let mut reader = HeaderReader::new(bytes);
    reader.take(TBF_MAGIC.len(), "magic")?;

    let count = reader.read_u64("entry count")?;
    let remaining = reader.remaining() as u64;
    if count > remaining / MIN_RECORD_LEN {
        return Err(TbfError::Truncated {
            position: TBF_MAGIC.len() as u64,
            needed: count.saturating_mul(MIN_RECORD_LEN),
            available: remaining,
            context: format!("{count} header records"),
        });
    }

    let mut headers = Vec::with_capacity(count as usize);
    let mut seen = HashSet::with_capacity(count as usize);
    for index in 0..count as usize {
        let record_pos = reader.position();
        let header = read_record(&mut reader, index)?;
        if !seen.insert(header.name.clone()) {
            return Err(TbfError::MalformedEntry {
                index,
                position: record_pos,
                reason: format!("duplicate tensor name '{}'", header.name),
            });
        }
        headers.push(header);
    }

    let data_start = reader.position();
    debug_assert_eq!(
        data_start,
        PREAMBLE_LEN + headers.iter().map(TensorHeader::record_len).sum::<u64>()
    );
    let data_end = validate_layout(&headers, data_start, bytes.len() as u64)?;

    let trailing = bytes.len() as u64 - data_end;
    if trailing > 0 {
        warn!(trailing, "ignoring bytes after the last tensor");
    }
    debug!(entries = headers.len(), data_start, file_len = bytes.len(), "parsed TBF1 header");
    Ok(headers)
}

/// Step 4. Returns the end of the data section.
fn validate_layout(headers: &[TensorHeader], data_start: u64, file_len: u64) -> Result<u64> {
    let mut expected_offset = data_start;
    for (index, header) in headers.iter().enumerate() {
        // an overflowing product never matches; it is reported as u64::MAX
        let expected_len = expected_byte_length(header.dtype, &header.shape);
        if expected_len != Some(header.byte_length) {
            return Err(TbfError::SizeMismatch {
                index,
                name: header.name.clone(),
                expected: expected_len.unwrap_or(u64::MAX),
                actual: header.byte_length,
            });
        }

        if header.byte_offset != expected_offset {
            return Err(TbfError::OffsetIntegrity {
                index,
                name: header.name.clone(),
                expected: expected_offset,
                actual: header.byte_offset,
            });
        }

        let end = match header.byte_offset.checked_add(header.byte_length) {
            Some(end) if end <= file_len => end,
            _ => {
                return Err(TbfError::Truncated {
                    position: header.byte_offset,
                    needed: header.byte_length,
                    available: file_len.saturating_sub(header.byte_offset),
                    context: format!("data of entry {index} '{}'", header.name),
                })
            }
        };
        expected_offset = end;
    }
    Ok(expected_offset)
}

/// Pairs validated headers with their data, borrowed from `bytes`.
fn attach_data<'a>(bytes: &'a [u8], headers: Vec<TensorHeader>) -> Catalog<'a> {
    let entries = headers
        .into_iter()
        .map(|header| {
            // in bounds: validate_layout checked offset + length <= bytes.len()
            let start = header.byte_offset as usize;
            let end = start + header.byte_length as usize;
            TensorEntry {
                data: Cow::Borrowed(&bytes[start..end]),
                header,
            }
        })
        .collect();
    Catalog::from_unique_entries(entries)
}

/// Decodes a complete TBF1 buffer. Tensor data is borrowed, not copied.
pub fn decode(bytes: &[u8]) -> Result<Catalog<'_>> {
    let headers = parse_headers(bytes)?;
    Ok(attach_data(bytes, headers))
}

/// Reads a stream to its end and decodes it into an owned catalog.
pub fn decode_from_reader<R: Read>(mut reader: R) -> Result<Catalog<'static>> {
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .map_err(|e| TbfError::io("reading TBF1 stream", e))?;
    let catalog = decode(&buffer)?.into_owned();
    Ok(catalog)
}

/// A TBF1 file mapped into memory.
///
/// Headers are validated once at `open`; tensor data is served straight from
/// the mapping.
pub struct TbfFile {
    path: PathBuf,
    mmap: Mmap,
    headers: Vec<TensorHeader>,
}

impl TbfFile {
    /// Memory-maps and validates `path`.
    ///
    /// # Errors
    /// * `Io` if the file cannot be opened or mapped
    /// * any structural error from [`parse_headers`]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TbfError::io(format!("opening {}", path.display()), e))?;
        // SAFETY: the mapping is read-only and never handed out mutably. The
        // file must not be truncated by another process while mapped.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| TbfError::io(format!("mapping {}", path.display()), e))?;
        let headers = parse_headers(&mmap)?;

        info!(
            path = %path.display(),
            tensors = headers.len(),
            bytes = mmap.len(),
            "mapped TBF1 file"
        );
        Ok(TbfFile {
            path: path.to_path_buf(),
            mmap,
            headers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[TensorHeader] {
        &self.headers
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Raw bytes of the tensor at `index` in catalog order.
    pub fn tensor_data(&self, index: usize) -> Option<&[u8]> {
        let header = self.headers.get(index)?;
        let start = header.byte_offset as usize;
        self.mmap.get(start..start + header.byte_length as usize)
    }

    /// Zero-copy view of the whole file as a catalog.
    pub fn catalog(&self) -> Catalog<'_> {
        attach_data(&self.mmap, self.headers.clone())
    }

    /// Fetches one tensor by name without building the full catalog.
    pub fn lookup(&self, name: &str) -> Result<TensorEntry<'_>> {
        let index = self
            .headers
            .iter()
            .position(|h| h.name == name)
            .ok_or_else(|| TbfError::NotFound { name: name.to_string() })?;
        let data = self.tensor_data(index).ok_or_else(|| TbfError::NotFound { name: name.to_string() })?;
        Ok(TensorEntry {
            header: self.headers[index].clone(),
            data: Cow::Borrowed(data),
        })
    }
}

impl std::fmt::Debug for TbfFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TbfFile")
            .field("path", &self.path)
            .field("bytes", &self.mmap.len())
            .field("tensors", &self.headers.len())
            .finish()
    }
}
