//! Wire-level primitives shared by the PDU reader and writer.
//!
//! All multi-byte integers in the upper layer protocol are big endian.
//! Items and sub-items share a common header:
//! item type (1 byte), reserved (1 byte) and
//! the length of the content that follows (2 bytes).
use crate::pdu::writer::{AeTitleTooLongSnafu, FieldTooLongSnafu, Result, WriteFieldSnafu};
use byteordered::byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use snafu::{ensure, ResultExt};
use std::io::{Cursor, ErrorKind, Write};

/// The fixed length of an AE title field.
pub const AE_TITLE_LENGTH: usize = 16;

/// Decode a text field from its raw bytes,
/// dropping trailing null bytes.
///
/// Text which is not valid UTF-8 is refused
/// rather than altered.
pub fn decode_string(bytes: &[u8]) -> std::io::Result<String> {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))
}

/// Decode an AE title field,
/// dropping the trailing space padding.
pub fn decode_ae_title(bytes: &[u8]) -> std::io::Result<String> {
    let mut title = decode_string(bytes)?;
    title.truncate(title.trim_end_matches(' ').len());
    Ok(title)
}

/// Take the next `len` bytes out of an in-memory cursor.
pub fn read_slice<'a>(cursor: &mut Cursor<&'a [u8]>, len: usize) -> std::io::Result<&'a [u8]> {
    let data: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| std::io::Error::from(ErrorKind::UnexpectedEof))?;
    cursor.set_position(end as u64);
    Ok(&data[start..end])
}

/// Number of bytes not yet consumed by the cursor.
pub fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor
        .get_ref()
        .len()
        .saturating_sub(cursor.position() as usize)
}

/// Read a byte array prefixed by its 16-bit length.
pub fn read_u16_prefixed<'a>(cursor: &mut Cursor<&'a [u8]>) -> std::io::Result<&'a [u8]> {
    let len = cursor.read_u16::<BigEndian>()?;
    read_slice(cursor, len as usize)
}

/// Read a string prefixed by its 16-bit length.
pub fn read_u16_prefixed_string(cursor: &mut Cursor<&[u8]>) -> std::io::Result<String> {
    read_u16_prefixed(cursor).and_then(decode_string)
}

/// Read an item header, returning the item type and the item content.
pub fn read_item<'a>(cursor: &mut Cursor<&'a [u8]>) -> std::io::Result<(u8, &'a [u8])> {
    let item_type = cursor.read_u8()?;
    let _reserved = cursor.read_u8()?;
    let len = cursor.read_u16::<BigEndian>()?;
    let content = read_slice(cursor, len as usize)?;
    Ok((item_type, content))
}

/// Write an item header with the length of its content,
/// which must fit in 16 bits.
pub fn write_item_header<W>(writer: &mut W, item_type: u8, length: usize) -> Result<()>
where
    W: ?Sized + Write,
{
    ensure!(
        length <= u16::MAX as usize,
        FieldTooLongSnafu {
            field: "Item-length",
            length
        }
    );
    writer
        .write_u8(item_type)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0)
        .context(WriteFieldSnafu { field: "Reserved" })?;
    writer
        .write_u16::<BigEndian>(length as u16)
        .context(WriteFieldSnafu {
            field: "Item-length",
        })
}

/// Write an item whose whole content is a single string.
pub fn write_string_item<W>(
    writer: &mut W,
    item_type: u8,
    field: &'static str,
    value: &str,
) -> Result<()>
where
    W: ?Sized + Write,
{
    write_item_header(writer, item_type, value.len())?;
    writer
        .write_all(value.as_bytes())
        .context(WriteFieldSnafu { field })
}

/// Write a byte array prefixed by its 16-bit length.
pub fn write_u16_prefixed<W>(writer: &mut W, field: &'static str, value: &[u8]) -> Result<()>
where
    W: ?Sized + Write,
{
    ensure!(
        value.len() <= u16::MAX as usize,
        FieldTooLongSnafu {
            field,
            length: value.len()
        }
    );
    writer
        .write_u16::<BigEndian>(value.len() as u16)
        .context(WriteFieldSnafu { field })?;
    writer.write_all(value).context(WriteFieldSnafu { field })
}

/// Write an AE title, padded with spaces to 16 bytes.
pub fn write_ae_title<W>(writer: &mut W, field: &'static str, title: &str) -> Result<()>
where
    W: ?Sized + Write,
{
    ensure!(
        title.len() <= AE_TITLE_LENGTH,
        AeTitleTooLongSnafu {
            field,
            title: title.to_string()
        }
    );
    let mut padded = [b' '; AE_TITLE_LENGTH];
    padded[..title.len()].copy_from_slice(title.as_bytes());
    writer.write_all(&padded).context(WriteFieldSnafu { field })
}
