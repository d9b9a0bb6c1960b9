/*
tbf1: inspect and check TBF1 weight files.

The exporter that produces these files and the runtime that consumes them live
elsewhere; this binary only reads.

# Usage Examples
```bash
# List every tensor with dtype, shape, offset and size
cargo run -- inspect models/all-MiniLM-L6-v2.tbf

# Full structural check, non-zero exit on any corruption
cargo run -- verify models/all-MiniLM-L6-v2.tbf

# First 8 values of one tensor
cargo run -- show models/all-MiniLM-L6-v2.tbf embeddings.LayerNorm.weight --limit 8

# More detail on stderr
RUST_LOG=debug cargo run -- verify models/all-MiniLM-L6-v2.tbf
```
*/

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tbf1::{DtypeTag, TbfFile, TensorEntry};

/// Inspect and check TBF1 tensor files
#[derive(Parser, Debug)]
#[command(name = "tbf1")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tensor table
    Inspect {
        /// TBF1 file to read
        file: PathBuf,
    },
    /// Validate every header record and data block
    Verify {
        /// TBF1 file to read
        file: PathBuf,
    },
    /// Print the leading values of one tensor
    Show {
        /// TBF1 file to read
        file: PathBuf,
        /// Tensor name, e.g. encoder.layer.0.attention.self.query.weight
        name: String,
        /// How many values to print
        #[arg(short, long, default_value_t = 16)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::Verify { file } => verify(&file),
        Command::Show { file, name, limit } => show(&file, &name, limit),
    }
}

fn open(path: &Path) -> Result<TbfFile> {
    TbfFile::open(path).with_context(|| format!("failed to load {}", path.display()))
}

fn inspect(path: &Path) -> Result<()> {
    let file = open(path)?;
    println!("{}", file.catalog());
    Ok(())
}

fn verify(path: &Path) -> Result<()> {
    let file = open(path)?;
    let catalog = file.catalog();
    println!(
        "{}: OK ({} tensors, data starts at byte {}, {} bytes of tensor data)",
        path.display(),
        catalog.len(),
        catalog.data_start(),
        catalog.data_len()
    );
    Ok(())
}

fn show(path: &Path, name: &str, limit: usize) -> Result<()> {
    let file = open(path)?;
    let entry = file
        .lookup(name)
        .with_context(|| format!("no tensor '{}' in {}", name, path.display()))?;

    println!("Name: {}", entry.name());
    println!("  Dimensions: {:?}", entry.shape());
    println!("  Type: {}", entry.dtype());
    println!("  Size: {:.2} MB", entry.byte_length() as f64 / (1024.0 * 1024.0));
    println!("  Offset: {}", entry.byte_offset());
    println!("  First values: {}", leading_values(&entry, limit)?);
    Ok(())
}

fn leading_values(entry: &TensorEntry<'_>, limit: usize) -> Result<String> {
    let rendered: Vec<String> = match entry.dtype() {
        DtypeTag::Float32 | DtypeTag::Float16 | DtypeTag::Float64 => entry
            .to_f32_vec()?
            .into_iter()
            .take(limit)
            .map(|v| format!("{v:.6}"))
            .collect(),
        DtypeTag::Int64 | DtypeTag::Int32 | DtypeTag::UInt8 => entry
            .to_i64_vec()?
            .into_iter()
            .take(limit)
            .map(|v| v.to_string())
            .collect(),
    };
    Ok(format!("[{}]", rendered.join(", ")))
}
