//! GGUF metadata probe.
//!
//! Reads only the key/value header of a .gguf file, never tensor data,
//! so it is fast enough for model discovery, pre-load memory estimation,
//! and default context-size selection.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use drover_core::{Error, ErrorKind, Result};

const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Metadata value type tags from the GGUF spec.
const T_UINT8: u32 = 0;
const T_INT8: u32 = 1;
const T_UINT16: u32 = 2;
const T_INT16: u32 = 3;
const T_UINT32: u32 = 4;
const T_INT32: u32 = 5;
const T_FLOAT32: u32 = 6;
const T_BOOL: u32 = 7;
const T_STRING: u32 = 8;
const T_ARRAY: u32 = 9;
const T_UINT64: u32 = 10;
const T_INT64: u32 = 11;
const T_FLOAT64: u32 = 12;

/// Sanity cap on string lengths in the header; embedded chat templates
/// run to a few KB, tokenizer merge strings stay far below this.
const MAX_STRING_LEN: u64 = 16 * 1024 * 1024;

/// Lightweight metadata extracted from a GGUF header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GgufInfo {
    /// e.g. "llama", "gemma2", "phi3"
    pub architecture: String,
    /// From `<arch>.context_length`.
    pub training_context_length: usize,
    /// From `<arch>.block_count`.
    pub n_layers: usize,
    /// From `<arch>.embedding_length`.
    pub n_embd: usize,
    /// From `<arch>.attention.head_count`.
    pub n_head: usize,
}

/// Read metadata from a GGUF file header (format versions 2 and 3).
pub fn read_gguf_metadata(path: impl AsRef<Path>) -> Result<GgufInfo> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        Error::new(ErrorKind::ModelLoadFailed, format!("cannot open model file: {e}"))
            .with_context(path.display().to_string())
    })?;
    let mut reader = HeaderReader {
        inner: BufReader::new(file),
    };

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != GGUF_MAGIC {
        return Err(Error::new(ErrorKind::ModelLoadFailed, "not a GGUF file (bad magic)")
            .with_context(path.display().to_string()));
    }

    let version = reader.read_u32()?;
    if version != 2 && version != 3 {
        return Err(Error::new(
            ErrorKind::ModelLoadFailed,
            format!("unsupported GGUF version {version}"),
        )
        .with_context(path.display().to_string()));
    }

    let _tensor_count = reader.read_u64()?;
    let kv_count = reader.read_u64()?;

    // First pass keys arrive in file order; general.architecture is
    // written first by all converters, so the arch-scoped keys below can
    // be resolved in a single pass.
    let mut info = GgufInfo::default();
    let mut wanted: Vec<(String, Field)> = Vec::new();

    for _ in 0..kv_count {
        let key = reader.read_string()?;
        let value_type = reader.read_u32()?;

        if key == "general.architecture" && value_type == T_STRING {
            info.architecture = reader.read_string()?;
            wanted = [
                (format!("{}.context_length", info.architecture), Field::Context),
                (format!("{}.block_count", info.architecture), Field::Layers),
                (format!("{}.embedding_length", info.architecture), Field::Embd),
                (
                    format!("{}.attention.head_count", info.architecture),
                    Field::Heads,
                ),
            ]
            .into();
            continue;
        }

        match wanted.iter().find(|(name, _)| *name == key) {
            Some((_, field)) => {
                let value = reader.read_uint_value(value_type)?;
                match field {
                    Field::Context => info.training_context_length = value as usize,
                    Field::Layers => info.n_layers = value as usize,
                    Field::Embd => info.n_embd = value as usize,
                    Field::Heads => info.n_head = value as usize,
                }
            }
            None => reader.skip_value(value_type)?,
        }
    }

    Ok(info)
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Context,
    Layers,
    Embd,
    Heads,
}

struct HeaderReader {
    inner: BufReader<File>,
}

impl HeaderReader {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| Error::new(ErrorKind::ModelLoadFailed, format!("truncated GGUF header: {e}")))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u64()?;
        if len > MAX_STRING_LEN {
            return Err(Error::new(
                ErrorKind::ModelLoadFailed,
                format!("GGUF string length {len} exceeds sanity cap"),
            ));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|_| Error::new(ErrorKind::ModelLoadFailed, "GGUF string is not valid UTF-8"))
    }

    /// Read an integer-typed value, widening to u64.
    fn read_uint_value(&mut self, value_type: u32) -> Result<u64> {
        match value_type {
            T_UINT8 | T_INT8 | T_BOOL => {
                let mut buf = [0u8; 1];
                self.read_exact(&mut buf)?;
                Ok(buf[0] as u64)
            }
            T_UINT16 | T_INT16 => {
                let mut buf = [0u8; 2];
                self.read_exact(&mut buf)?;
                Ok(u16::from_le_bytes(buf) as u64)
            }
            T_UINT32 | T_INT32 => Ok(self.read_u32()? as u64),
            T_UINT64 | T_INT64 => self.read_u64(),
            other => Err(Error::new(
                ErrorKind::ModelLoadFailed,
                format!("expected integer GGUF value, got type {other}"),
            )),
        }
    }

    fn skip(&mut self, bytes: u64) -> Result<()> {
        self.inner
            .seek(SeekFrom::Current(bytes as i64))
            .map_err(|e| Error::new(ErrorKind::ModelLoadFailed, format!("seek failed: {e}")))?;
        Ok(())
    }

    fn skip_value(&mut self, value_type: u32) -> Result<()> {
        match value_type {
            T_UINT8 | T_INT8 | T_BOOL => self.skip(1),
            T_UINT16 | T_INT16 => self.skip(2),
            T_UINT32 | T_INT32 | T_FLOAT32 => self.skip(4),
            T_UINT64 | T_INT64 | T_FLOAT64 => self.skip(8),
            T_STRING => {
                let len = self.read_u64()?;
                self.skip(len)
            }
            T_ARRAY => {
                let elem_type = self.read_u32()?;
                let count = self.read_u64()?;
                match elem_type {
                    T_UINT8 | T_INT8 | T_BOOL => self.skip(count),
                    T_UINT16 | T_INT16 => self.skip(count * 2),
                    T_UINT32 | T_INT32 | T_FLOAT32 => self.skip(count * 4),
                    T_UINT64 | T_INT64 | T_FLOAT64 => self.skip(count * 8),
                    T_STRING => {
                        for _ in 0..count {
                            let len = self.read_u64()?;
                            self.skip(len)?;
                        }
                        Ok(())
                    }
                    other => Err(Error::new(
                        ErrorKind::ModelLoadFailed,
                        format!("unsupported GGUF array element type {other}"),
                    )),
                }
            }
            other => Err(Error::new(
                ErrorKind::ModelLoadFailed,
                format!("unknown GGUF value type {other}"),
            )),
        }
    }
}
