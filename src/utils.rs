use std::{
    fs::File,
    io::{BufWriter, Cursor, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};

/// Reads a whole file, gunzipping it when it carries gzip framing
///
/// Files that fail to decode as gzip are returned as-is, which lets readers accept
/// legacy side files that were written uncompressed.
pub fn read_maybe_gzip<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut raw)?;
    let mut decoded = Vec::new();
    match GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded) {
        Ok(_) => Ok(decoded),
        Err(err) => {
            log::trace!(
                "{} is not gzip framed ({err}), reading it uncompressed",
                path.as_ref().display()
            );
            Ok(raw)
        }
    }
}

/// Writes `bytes` gzip compressed to `path`
pub fn write_gzip<P: AsRef<Path>>(path: P, bytes: &[u8]) -> std::io::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?.flush()
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> std::io::Result<()> {
    writer.write_u32::<LittleEndian>(value.len() as u32)?;
    writer.write_all(value.as_bytes())
}

pub fn read_string(cursor: &mut Cursor<&[u8]>) -> crate::Result<String> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut bytes = vec![0; len];
    cursor.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

pub fn write_u32_slice<W: Write>(writer: &mut W, values: &[u32]) -> std::io::Result<()> {
    writer.write_u32::<LittleEndian>(values.len() as u32)?;
    values
        .iter()
        .try_for_each(|v| writer.write_u32::<LittleEndian>(*v))
}

pub fn read_u32_vec(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Vec<u32>> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    (0..len)
        .map(|_| cursor.read_u32::<LittleEndian>())
        .collect()
}
