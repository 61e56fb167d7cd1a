//! Non-blocking PDU reading and writing, on top of tokio.
//!
//! A PDU is only handed to the parser
//! once all of its bytes have arrived,
//! so a slow peer never leaves the parser with a partial PDU.
use crate::pdu::reader::{
    check_pdu_header, read_pdu_body, InvalidMaxPduSnafu, NoPduAvailableSnafu, ReadPduHeaderSnafu,
    ReadPduSnafu, Result,
};
use crate::pdu::writer::{self, WritePduSnafu};
use crate::pdu::{Pdu, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE, PDU_HEADER_SIZE};
use bytes::{Buf, BytesMut};
use snafu::{ensure, ResultExt};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read a single PDU from an asynchronous source.
///
/// `read_buffer` keeps any bytes received past the end of this PDU,
/// and must be passed again on the next call for the same source.
pub async fn read_pdu<R>(
    reader: &mut R,
    read_buffer: &mut BytesMut,
    max_pdu_length: u32,
    strict: bool,
) -> Result<Pdu>
where
    R: AsyncRead + Unpin,
{
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    let header_size = PDU_HEADER_SIZE as usize;
    while read_buffer.len() < header_size {
        let n = reader
            .read_buf(read_buffer)
            .await
            .context(ReadPduHeaderSnafu)?;
        if n == 0 {
            ensure!(!read_buffer.is_empty(), NoPduAvailableSnafu);
            return Err(std::io::Error::from(ErrorKind::UnexpectedEof))
                .context(ReadPduHeaderSnafu);
        }
    }

    let pdu_type = read_buffer[0];
    let pdu_length = u32::from_be_bytes([
        read_buffer[2],
        read_buffer[3],
        read_buffer[4],
        read_buffer[5],
    ]);
    check_pdu_header(pdu_type, pdu_length, max_pdu_length, strict)?;

    let frame_size = header_size + pdu_length as usize;
    read_buffer.reserve(frame_size.saturating_sub(read_buffer.len()));
    while read_buffer.len() < frame_size {
        let n = reader.read_buf(read_buffer).await.context(ReadPduSnafu)?;
        if n == 0 {
            return Err(std::io::Error::from(ErrorKind::UnexpectedEof)).context(ReadPduSnafu);
        }
    }

    let mut frame = read_buffer.split_to(frame_size);
    frame.advance(header_size);
    read_pdu_body(pdu_type, &frame)
}

/// Write a whole PDU to an asynchronous destination.
pub async fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> writer::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    writer::write_pdu(&mut buf, pdu)?;
    writer.write_all(&buf).await.context(WritePduSnafu)?;
    writer.flush().await.context(WritePduSnafu)
}
