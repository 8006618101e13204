//! Token level (de)serialization shared by the network and every component.
//!
//! Files written in binary mode start with the `\0B` header; `open_input`
//! sniffs it so that readers never need to be told the mode.

mod reader;
mod writer;

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

pub use reader::TokenReader;
pub use writer::TokenWriter;

use crate::Result;

const BINARY_HEADER: &[u8; 2] = b"\0B";

/// Opens a persisted file for reading, detecting its encoding.
///
/// # Arguments
/// * `path` - The file to open.
///
/// # Returns
/// A token reader positioned after the header, if any.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<TokenReader<BufReader<File>>> {
    let mut inner = BufReader::new(File::open(path)?);
    let binary = inner.fill_buf()?.starts_with(BINARY_HEADER);
    if binary {
        inner.consume(BINARY_HEADER.len());
    }

    Ok(TokenReader::new(inner, binary))
}

/// Creates (or truncates) a file for writing in the requested encoding.
pub fn create_output<P: AsRef<Path>>(
    path: P,
    binary: bool,
) -> Result<TokenWriter<BufWriter<File>>> {
    let mut inner = BufWriter::new(File::create(path)?);
    if binary {
        inner.write_all(BINARY_HEADER)?;
    }

    Ok(TokenWriter::new(inner, binary))
}
