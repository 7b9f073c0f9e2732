//! Little-endian encoding of persisted kernel modules.
//!
//! Strings are a `u64` byte length followed by UTF-8 bytes, sequences a `u64`
//! count followed by their elements.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use kiln_dtype::DType;
use snafu::{OptionExt, ResultExt};

use super::KernelMetadata;
use crate::error::{DecodeSnafu, Result, StreamSnafu};

pub(crate) fn write_len<W: Write>(w: &mut W, len: usize) -> Result<()> {
    w.write_u64::<LittleEndian>(len as u64).context(StreamSnafu)
}

pub(crate) fn read_len<R: Read>(r: &mut R) -> Result<usize> {
    let len = r.read_u64::<LittleEndian>().context(StreamSnafu)?;
    usize::try_from(len).ok().context(DecodeSnafu { reason: format!("length {len} does not fit in memory") })
}

pub(crate) fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    write_len(w, s.len())?;
    w.write_all(s.as_bytes()).context(StreamSnafu)
}

pub(crate) fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = read_len(r)?;
    let mut bytes = Vec::new();
    r.take(len as u64).read_to_end(&mut bytes).context(StreamSnafu)?;
    snafu::ensure!(bytes.len() == len, DecodeSnafu { reason: format!("string truncated at {} of {len} bytes", bytes.len()) });
    String::from_utf8(bytes).map_err(|e| crate::Error::Decode { reason: format!("string is not UTF-8: {e}") })
}

fn write_dtype<W: Write>(w: &mut W, dtype: &DType) -> Result<()> {
    let (code, bits, lanes) = dtype.to_dl();
    w.write_u8(code).context(StreamSnafu)?;
    w.write_u8(bits).context(StreamSnafu)?;
    w.write_u16::<LittleEndian>(lanes).context(StreamSnafu)
}

fn read_dtype<R: Read>(r: &mut R) -> Result<DType> {
    let code = r.read_u8().context(StreamSnafu)?;
    let bits = r.read_u8().context(StreamSnafu)?;
    let lanes = r.read_u16::<LittleEndian>().context(StreamSnafu)?;
    DType::from_dl(code, bits, lanes).map_err(|e| crate::Error::Decode { reason: e.to_string() })
}

fn write_metadata<W: Write>(w: &mut W, meta: &KernelMetadata) -> Result<()> {
    write_str(w, &meta.name)?;
    write_len(w, meta.arg_types.len())?;
    for dtype in &meta.arg_types {
        write_dtype(w, dtype)?;
    }
    write_len(w, meta.launch_param_tags.len())?;
    for tag in &meta.launch_param_tags {
        write_str(w, tag)?;
    }
    Ok(())
}

fn read_metadata<R: Read>(r: &mut R) -> Result<KernelMetadata> {
    let name = read_string(r)?;
    let arg_types = (0..read_len(r)?).map(|_| read_dtype(r)).collect::<Result<_>>()?;
    let launch_param_tags = (0..read_len(r)?).map(|_| read_string(r)).collect::<Result<_>>()?;
    Ok(KernelMetadata { name, arg_types, launch_param_tags })
}

pub(crate) fn write_function_map<W: Write>(w: &mut W, functions: &BTreeMap<String, KernelMetadata>) -> Result<()> {
    write_len(w, functions.len())?;
    for (name, meta) in functions {
        write_str(w, name)?;
        write_metadata(w, meta)?;
    }
    Ok(())
}

pub(crate) fn read_function_map<R: Read>(r: &mut R) -> Result<BTreeMap<String, KernelMetadata>> {
    let count = read_len(r)?;
    (0..count).map(|_| -> Result<(String, KernelMetadata)> { Ok((read_string(r)?, read_metadata(r)?)) }).collect()
}
