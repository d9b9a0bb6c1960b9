// name of module: tbf_encoder_module

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info};

use crate::tbf_catalog_module::{
    expected_byte_length, Catalog, SourceTensor, TensorHeader, MAX_NAME_LEN, MAX_RANK, PREAMBLE_LEN, TBF_MAGIC,
};
use crate::tbf_decoder_module::TbfFile;
use crate::tbf_error_module::{Result, TbfError};

/// Settings for [`write_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Memory-map the file after writing and check its headers against the
    /// catalog that was written.
    pub verify_after_write: bool,
}

impl WriteOptions {
    pub fn verified() -> Self {
        WriteOptions {
            verify_after_write: true,
        }
    }
}

/// Builds a catalog from provider tensors and serialises it.
///
/// # Errors
/// * Any error from [`Catalog::build`]; nothing is produced in that case
pub fn encode<'a, I>(source: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = SourceTensor<'a>>,
{
    let catalog = Catalog::build(source)?;
    encode_to_vec(&catalog)
}

/// Serialises a catalog into a fresh buffer of exactly the file's size.
///
/// The layout is checked before the buffer is sized, so declared lengths
/// never drive an allocation.
pub fn encode_to_vec(catalog: &Catalog<'_>) -> Result<Vec<u8>> {
    let total = check_layout(catalog)?;
    // total is bounded by data already held in memory once the layout checks out
    let mut out = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
    write_layout(catalog, &mut out, total)?;
    Ok(out)
}

/// Writes the whole file layout to `writer`: magic, count, header records,
/// then the data blocks in catalog order.
///
/// The catalog's sizes and offsets are checked against the layout before the
/// first byte is written, so a hand-assembled catalog can't produce a file the
/// decoder would reject.
///
/// # Returns
/// * Number of bytes written
///
/// # Errors
/// * `SizeMismatch` if a byte length disagrees with dtype and shape, or with
///   the length of the entry's data
/// * `OffsetIntegrity` if the catalog is not laid out contiguously from
///   `data_start`
/// * `MalformedEntry` if a name or rank does not fit a header record
/// * `Io` on any write failure; the sink may hold a partial file
pub fn encode_catalog<W: Write>(catalog: &Catalog<'_>, writer: &mut W) -> Result<u64> {
    let total = check_layout(catalog)?;
    write_layout(catalog, writer, total)
}

fn write_layout<W: Write>(catalog: &Catalog<'_>, writer: &mut W, total: u64) -> Result<u64> {
    let io_err = |what: &str, e: std::io::Error| TbfError::io(format!("writing {what}"), e);

    writer.write_all(&TBF_MAGIC).map_err(|e| io_err("magic", e))?;
    writer
        .write_u64::<LittleEndian>(catalog.len() as u64)
        .map_err(|e| io_err("entry count", e))?;

    for header in catalog.headers() {
        write_record(writer, header).map_err(|e| io_err(&format!("header of '{}'", header.name), e))?;
    }

    for entry in catalog {
        debug!(
            name = entry.name(),
            offset = entry.byte_offset(),
            nbytes = entry.byte_length(),
            "placing tensor"
        );
        writer
            .write_all(entry.data())
            .map_err(|e| io_err(&format!("data of '{}'", entry.name()), e))?;
    }

    Ok(total)
}

fn write_record<W: Write>(writer: &mut W, header: &TensorHeader) -> std::io::Result<()> {
    writer.write_u16::<LittleEndian>(header.name.len() as u16)?;
    writer.write_all(header.name.as_bytes())?;
    writer.write_u8(header.dtype.code())?;
    writer.write_u8(header.shape.len() as u8)?;
    for &dim in &header.shape {
        writer.write_u32::<LittleEndian>(dim)?;
    }
    writer.write_u64::<LittleEndian>(header.byte_offset)?;
    writer.write_u64::<LittleEndian>(header.byte_length)
}

/// Re-derives the layout the decoder will check. Returns the file length.
fn check_layout(catalog: &Catalog<'_>) -> Result<u64> {
    let mut record_pos = PREAMBLE_LEN;
    let mut expected_offset = catalog.data_start();
    for (index, entry) in catalog.iter().enumerate() {
        if entry.name().len() > MAX_NAME_LEN || entry.shape().len() > MAX_RANK {
            return Err(TbfError::MalformedEntry {
                index,
                position: record_pos,
                reason: format!("'{}' does not fit a header record", entry.name()),
            });
        }

        let derived = expected_byte_length(entry.dtype(), entry.shape());
        if derived != Some(entry.byte_length()) {
            return Err(TbfError::SizeMismatch {
                index,
                name: entry.name().to_string(),
                expected: derived.unwrap_or(u64::MAX),
                actual: entry.byte_length(),
            });
        }
        if entry.data().len() as u64 != entry.byte_length() {
            return Err(TbfError::SizeMismatch {
                index,
                name: entry.name().to_string(),
                expected: entry.byte_length(),
                actual: entry.data().len() as u64,
            });
        }

        if entry.byte_offset() != expected_offset {
            return Err(TbfError::OffsetIntegrity {
                index,
                name: entry.name().to_string(),
                expected: expected_offset,
                actual: entry.byte_offset(),
            });
        }
        expected_offset = expected_offset
            .checked_add(entry.byte_length())
            .ok_or_else(|| TbfError::MalformedEntry {
                index,
                position: record_pos,
                reason: "data section size overflows u64".to_string(),
            })?;
        record_pos += entry.header.record_len();
    }
    Ok(expected_offset)
}

/// Encodes `catalog` into a new file at `path`.
///
/// The file is written in place. Callers that need atomic replacement should
/// write to a temporary path and rename it once this returns.
///
/// # Returns
/// * Number of bytes written
pub fn write_file(path: impl AsRef<Path>, catalog: &Catalog<'_>, options: &WriteOptions) -> Result<u64> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| TbfError::io(format!("creating {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    let written = encode_catalog(catalog, &mut writer)?;
    let file = writer
        .into_inner()
        .map_err(|e| TbfError::io(format!("flushing {}", path.display()), e.into_error()))?;
    file.sync_all()
        .map_err(|e| TbfError::io(format!("syncing {}", path.display()), e))?;

    info!(
        path = %path.display(),
        tensors = catalog.len(),
        bytes = written,
        "wrote TBF1 file"
    );

    if options.verify_after_write {
        verify_written(path, catalog)?;
    }
    Ok(written)
}

fn verify_written(path: &Path, catalog: &Catalog<'_>) -> Result<()> {
    let file = TbfFile::open(path)?;
    let failed = |detail: String| TbfError::VerificationFailed {
        path: path.display().to_string(),
        detail,
    };

    if file.len() != catalog.len() {
        return Err(failed(format!(
            "{} entries on disk, {} expected",
            file.len(),
            catalog.len()
        )));
    }
    for (index, (on_disk, expected)) in file.headers().iter().zip(catalog.headers()).enumerate() {
        if on_disk != expected {
            return Err(failed(format!("header of entry {index} '{}' differs", expected.name)));
        }
    }
    debug!(path = %path.display(), "verified written file");
    Ok(())
}
