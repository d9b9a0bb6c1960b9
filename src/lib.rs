//! TBF1: a flat little-endian container for named model weight tensors.
//!
//! A writer turns an ordered set of named tensors into a single file; a
//! minimal runtime maps that file and reads tensors back by name without any
//! ML framework in the loop.
//!
//! ```text
//! "TBF1" | entryCount u64 | header record * entryCount | tensor data ...
//! ```
//!
//! # Example
//!
//! ```
//! use tbf1::{decode, encode, SourceTensor};
//!
//! let bytes = encode(vec![SourceTensor::from_f32(
//!     "weight",
//!     vec![2, 3],
//!     &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
//! )])?;
//! assert_eq!(bytes.len(), 46 + 24);
//!
//! let catalog = decode(&bytes)?;
//! let weight = catalog.lookup("weight")?;
//! assert_eq!(weight.shape(), &[2, 3]);
//! assert_eq!(weight.byte_offset(), 46);
//! # Ok::<(), tbf1::TbfError>(())
//! ```

pub mod tbf_catalog_module;
pub mod tbf_decoder_module;
pub mod tbf_dtype_module;
pub mod tbf_encoder_module;
pub mod tbf_error_module;

pub use tbf_catalog_module::{
    expected_byte_length, record_len, Catalog, SourceTensor, TensorEntry, TensorHeader, MAX_NAME_LEN,
    MAX_RANK, MIN_RECORD_LEN, PREAMBLE_LEN, TBF_MAGIC,
};
pub use tbf_decoder_module::{decode, decode_from_reader, parse_headers, TbfFile};
pub use tbf_dtype_module::{DtypeTag, NativeDtype};
pub use tbf_encoder_module::{encode, encode_catalog, encode_to_vec, write_file, WriteOptions};
pub use tbf_error_module::{Result, TbfError};
