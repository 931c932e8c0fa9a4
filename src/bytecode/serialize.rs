//! MessagePack marshalling of compiled bytecode.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::bytecode::chunk::Bytecode;
use crate::error::{SerializeError, SharkError};

/// File extension for pre-built bytecode.
pub const BYTECODE_EXTENSION: &str = "sbc";

pub fn to_bytes(bytecode: &Bytecode) -> Result<Vec<u8>, SerializeError> {
    Ok(rmp_serde::to_vec(bytecode)?)
}

pub fn from_bytes(bytes: &[u8]) -> Result<Bytecode, SerializeError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

pub fn write_file(path: &Path, bytecode: &Bytecode) -> Result<(), SharkError> {
    let bytes = to_bytes(bytecode)?;
    fs::write(path, &bytes)?;
    debug!(target: "shark::compiler", path = %path.display(), bytes = bytes.len(), "wrote bytecode");
    Ok(())
}

pub fn read_file(path: &Path) -> Result<Bytecode, SharkError> {
    let bytes = fs::read(path)?;
    Ok(from_bytes(&bytes)?)
}

/// Whether `path` names a pre-built bytecode file.
pub fn is_bytecode_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(BYTECODE_EXTENSION)
}
