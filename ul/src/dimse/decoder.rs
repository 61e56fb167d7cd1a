//! DIMSE message decoder
//!
//! The [`PduDecoder`] reads PDUs from the transport one at a time.
//! Association control PDUs are handed over to an [`AssociationHandler`]
//! as they arrive.
//! P-DATA-TF PDUs are demultiplexed into DIMSE messages:
//! the command fragments of a message are reassembled and decoded,
//! and its data set fragments are exposed as a plain byte stream
//! through a [`PdvReader`],
//! transparently crossing fragment and PDU boundaries.
use std::io::{ErrorKind, Read, Write};

use byteordered::byteorder::{BigEndian, ByteOrder};
use dicom_object::{InMemDicomObject, ReadError};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use tracing::{debug, trace, warn};

use crate::association::AssociationContext;
use crate::dimse::command::{self, CommandField};
use crate::pdu::reader::{self, check_pdu_header, read_pdu_body, read_pdu_header, ReadPduSnafu};
use crate::pdu::{
    message_control, pdu_type, AbortRQServiceProviderReason, AbortRQSource, AssociationRJ,
    Negotiation, PDataValueType, Pdu, PresentationContext, PDV_HEADER_SIZE,
};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not receive PDU"))]
    ReceivePdu {
        #[snafu(backtrace)]
        source: reader::Error,
    },

    #[snafu(display(
        "Expected P-DATA-TF PDU but received {}",
        pdu.short_description()
    ))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("Truncated PDV header ({} bytes left in PDU)", available))]
    TruncatedPdv {
        available: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Invalid PDV item length {} ({} bytes left in PDU)",
        length,
        available
    ))]
    InvalidPdvLength {
        length: u32,
        available: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Expected {:?} PDV, got message control header {:#04x}",
        expected,
        message_control
    ))]
    UnexpectedPdvType {
        expected: PDataValueType,
        message_control: u8,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Expected PDV of presentation context {}, got {}",
        expected,
        got
    ))]
    UnexpectedPresentationContext {
        expected: u8,
        got: u8,
        backtrace: Backtrace,
    },

    #[snafu(display("No accepted presentation context with ID {}", id))]
    NoPresentationContext { id: u8, backtrace: Backtrace },

    #[snafu(display("Illegal DIMSE command field {:?}", code))]
    IllegalCommandField {
        code: Option<u16>,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not decode command set"))]
    ReadCommand {
        source: Box<ReadError>,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read message data"))]
    ReadData {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Request handler failed"))]
    HandleRequest {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The A-ABORT source to send to the peer
    /// when this error is a protocol violation on its part.
    ///
    /// Returns `None` when no abort should be sent:
    /// on transport failures,
    /// when the peer itself aborted,
    /// or when the local request handler failed.
    pub fn abort_source(&self) -> Option<AbortRQSource> {
        use AbortRQServiceProviderReason::*;
        let reason = match self {
            Error::ReceivePdu { source } => source.abort_reason()?,
            Error::UnexpectedPdu { pdu, .. } => match **pdu {
                Pdu::AbortRQ { .. } => return None,
                _ => UnexpectedPdu,
            },
            Error::TruncatedPdv { .. }
            | Error::InvalidPdvLength { .. }
            | Error::ReadCommand { .. } => InvalidPduParameter,
            Error::UnexpectedPdvType { .. } | Error::UnexpectedPresentationContext { .. } => {
                UnexpectedPduParameter
            }
            Error::NoPresentationContext { .. } | Error::IllegalCommandField { .. } => {
                return Some(AbortRQSource::ServiceUser(0))
            }
            Error::ReadData { .. } | Error::HandleRequest { .. } => return None,
        };
        Some(AbortRQSource::ServiceProvider(reason))
    }

    /// The underlying transport error, if this is one.
    pub fn transport_error(&self) -> Option<&std::io::Error> {
        match self {
            Error::ReceivePdu {
                source: reader::Error::ReadPduHeader { source, .. },
            }
            | Error::ReceivePdu {
                source: reader::Error::ReadPdu { source, .. },
            } => Some(source),
            _ => None,
        }
    }

    /// Whether the peer closed the connection
    /// at a PDU boundary.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self,
            Error::ReceivePdu {
                source: reader::Error::NoPduAvailable { .. }
            }
        )
    }
}

/// The receiving end of an association,
/// as seen by the DIMSE decoder.
///
/// Only the DIMSE callbacks must be implemented.
/// All other events are ignored by default.
pub trait AssociationHandler {
    /// An A-ASSOCIATE-RQ PDU was received.
    fn on_associate_rq(&mut self, _rq: Negotiation) {}

    /// An A-ASSOCIATE-AC PDU was received.
    fn on_associate_ac(&mut self, _ac: Negotiation) {}

    /// An A-ASSOCIATE-RJ PDU was received.
    fn on_associate_rj(&mut self, _rj: AssociationRJ) {}

    /// An A-ABORT PDU was received.
    fn on_abort(&mut self, _source: AbortRQSource) {}

    /// An A-RELEASE-RQ PDU was received.
    fn on_release_rq(&mut self) {}

    /// An A-RELEASE-RP PDU was received.
    fn on_release_rp(&mut self) {}

    /// A P-DATA-TF PDU was received,
    /// and its messages are about to be decoded.
    fn on_data_available(&mut self) {}

    /// A DIMSE request was received.
    ///
    /// If the request carries a data set,
    /// `data` provides it as a stream of bytes
    /// in the transfer syntax of the presentation context.
    /// Whatever is left unread is discarded
    /// once this method returns.
    fn on_dimse_rq(
        &mut self,
        pc: &PresentationContext,
        command_field: CommandField,
        command: InMemDicomObject,
        data: Option<&mut dyn PdvInput>,
    ) -> std::io::Result<()>;

    /// A DIMSE response was received,
    /// along with its full data set, if any.
    fn on_dimse_rsp(
        &mut self,
        pc: &PresentationContext,
        command_field: CommandField,
        command: InMemDicomObject,
        data: Option<Vec<u8>>,
    );

    /// A C-CANCEL-RQ was received.
    fn on_cancel(&mut self, _pc: &PresentationContext, _command: InMemDicomObject) {}

    /// Reading from the transport failed.
    fn on_transport_error(&mut self, _error: &std::io::Error) {}
}

/// Byte stream access to the fragments of a single command or data set.
pub trait PdvInput: Read {
    /// The number of bytes left in the current fragment.
    ///
    /// More bytes may follow in subsequent fragments.
    fn available(&self) -> usize;

    /// Skip up to `n` bytes of the current fragment,
    /// moving to the next fragment first if the current one was consumed.
    ///
    /// Returns the number of bytes skipped,
    /// which is 0 only at the end of the stream.
    fn skip(&mut self, n: u64) -> std::io::Result<u64>;

    /// Skip everything up to the end of the stream,
    /// returning the number of bytes skipped.
    fn skip_all(&mut self) -> std::io::Result<u64>;

    /// Copy bytes to the given sink,
    /// either exactly `length` bytes or up to the end of the stream.
    ///
    /// Running out of bytes before `length` is reached
    /// is an [`UnexpectedEof`](std::io::ErrorKind::UnexpectedEof) error.
    fn copy_to(&mut self, to: &mut dyn Write, length: Option<u64>) -> std::io::Result<u64>;
}

/// The PDU being demultiplexed and the position within it.
#[derive(Debug)]
struct PduInput<R> {
    reader: R,
    /// body of the current PDU
    buffer: Vec<u8>,
    pos: usize,
    message_control: u8,
    pdv_end: usize,
    max_pdu_length: u32,
    strict: bool,
    /// a decoding error hidden behind an I/O error by a PDV reader
    failure: Option<Error>,
}

impl<R> PduInput<R>
where
    R: Read,
{
    fn has_remaining(&self) -> bool {
        self.pos < self.buffer.len()
    }

    /// Read the next PDU into the buffer, returning its type.
    fn read_pdu(&mut self) -> Result<u8> {
        trace!("Waiting for PDU");
        let (pdu_type, pdu_length) = read_pdu_header(&mut self.reader).context(ReceivePduSnafu)?;
        check_pdu_header(pdu_type, pdu_length, self.max_pdu_length, self.strict)
            .context(ReceivePduSnafu)?;

        self.buffer.clear();
        self.buffer.resize(pdu_length as usize, 0);
        self.reader
            .read_exact(&mut self.buffer)
            .context(ReadPduSnafu)
            .context(ReceivePduSnafu)?;
        self.pos = 0;
        self.pdv_end = 0;
        self.message_control = 0;
        trace!("PDU type {:#04x}, length {}", pdu_type, pdu_length);
        Ok(pdu_type)
    }

    /// Move on to the next PDV, reading a new PDU if necessary.
    ///
    /// On failure the current PDV is left empty.
    fn next_pdv(&mut self, expected: PDataValueType, expected_pcid: Option<u8>) -> Result<u8> {
        let result = self.read_pdv_header(expected, expected_pcid);
        if result.is_err() {
            self.pdv_end = self.pos;
        }
        result
    }

    fn read_pdv_header(
        &mut self,
        expected: PDataValueType,
        expected_pcid: Option<u8>,
    ) -> Result<u8> {
        if !self.has_remaining() {
            let pdu_type = self.read_pdu()?;
            if pdu_type != pdu_type::P_DATA_TF {
                let pdu = read_pdu_body(pdu_type, &self.buffer).context(ReceivePduSnafu)?;
                self.pos = self.buffer.len();
                return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail();
            }
        }

        let available = self.buffer.len() - self.pos;
        ensure!(
            available >= PDV_HEADER_SIZE as usize,
            TruncatedPdvSnafu { available }
        );
        let length = BigEndian::read_u32(&self.buffer[self.pos..]);
        self.pos += 4;
        let available = available - 4;
        ensure!(
            length >= 2 && length as usize <= available,
            InvalidPdvLengthSnafu { length, available }
        );
        self.pdv_end = self.pos + length as usize;
        let pcid = self.buffer[self.pos];
        let header = self.buffer[self.pos + 1];
        self.pos += 2;
        self.message_control = header;
        trace!(
            "PDV length {}, presentation context {}, message control {:#04x}",
            length,
            pcid,
            header
        );

        ensure!(
            PDataValueType::from_message_control(header) == expected,
            UnexpectedPdvTypeSnafu {
                expected,
                message_control: header
            }
        );
        if let Some(expected) = expected_pcid {
            ensure!(
                pcid == expected,
                UnexpectedPresentationContextSnafu { expected, got: pcid }
            );
        }
        Ok(pcid)
    }

    /// Return the error stashed by a PDV reader,
    /// or the given one if there is none.
    fn take_failure_or(&mut self, error: Error) -> Error {
        self.failure.take().unwrap_or(error)
    }
}

/// A reader of the fragments of one command or data set.
///
/// Reaching the end of the fragment marked as the last one
/// is the end of the stream.
pub struct PdvReader<'a, R> {
    input: &'a mut PduInput<R>,
    pcid: u8,
}

impl<'a, R> PdvReader<'a, R>
where
    R: Read,
{
    fn new(input: &'a mut PduInput<R>, pcid: u8) -> Self {
        PdvReader { input, pcid }
    }

    /// Whether the end of the stream was reached,
    /// moving to the next fragment if the current one was consumed.
    ///
    /// Once moving to the next fragment has failed,
    /// the stream keeps failing with the same error.
    fn is_last_pdv(&mut self) -> std::io::Result<bool> {
        if let Some(e) = &self.input.failure {
            return Err(stream_error(e));
        }
        while self.input.pos >= self.input.pdv_end {
            let header = self.input.message_control;
            if header & message_control::LAST != 0 {
                return Ok(true);
            }
            let value_type = PDataValueType::from_message_control(header);
            if let Err(e) = self.input.next_pdv(value_type, Some(self.pcid)) {
                let error = stream_error(&e);
                self.input.failure = Some(e);
                return Err(error);
            }
        }
        Ok(false)
    }

    fn current(&self) -> &[u8] {
        let end = self.input.pdv_end.max(self.input.pos);
        &self.input.buffer[self.input.pos..end]
    }
}

/// Convert a decoding error into the I/O error reported by a PDV reader.
fn stream_error(e: &Error) -> std::io::Error {
    let kind = e
        .transport_error()
        .map(|e| e.kind())
        .unwrap_or(ErrorKind::InvalidData);
    std::io::Error::new(kind, e.to_string())
}

impl<R> Read for PdvReader<'_, R>
where
    R: Read,
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() || self.is_last_pdv()? {
            return Ok(0);
        }
        let n = self.current().len().min(buf.len());
        buf[..n].copy_from_slice(&self.current()[..n]);
        self.input.pos += n;
        Ok(n)
    }
}

impl<R> PdvInput for PdvReader<'_, R>
where
    R: Read,
{
    fn available(&self) -> usize {
        self.input.pdv_end.saturating_sub(self.input.pos)
    }

    fn skip(&mut self, n: u64) -> std::io::Result<u64> {
        if n == 0 || self.is_last_pdv()? {
            return Ok(0);
        }
        let skipped = n.min(self.available() as u64);
        self.input.pos += skipped as usize;
        Ok(skipped)
    }

    fn skip_all(&mut self) -> std::io::Result<u64> {
        let mut skipped = 0;
        while !self.is_last_pdv()? {
            skipped += self.available() as u64;
            self.input.pos = self.input.pdv_end;
        }
        Ok(skipped)
    }

    fn copy_to(&mut self, to: &mut dyn Write, length: Option<u64>) -> std::io::Result<u64> {
        let mut copied = 0;
        loop {
            if length == Some(copied) {
                return Ok(copied);
            }
            if self.is_last_pdv()? {
                return match length {
                    None => Ok(copied),
                    Some(length) => Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("{} bytes remaining", length - copied),
                    )),
                };
            }
            let mut n = self.available();
            if let Some(length) = length {
                n = n.min((length - copied) as usize);
            }
            to.write_all(&self.current()[..n])?;
            self.input.pos += n;
            copied += n as u64;
        }
    }
}

/// A decoder of the PDUs received through an association.
///
/// The decoder owns the reading half of the transport
/// and a buffer holding one whole PDU,
/// which grows up to the largest PDU received.
#[derive(Debug)]
pub struct PduDecoder<R, C> {
    input: PduInput<R>,
    context: C,
}

impl<R, C> PduDecoder<R, C>
where
    R: Read,
    C: AssociationContext,
{
    /// Create a decoder reading from `reader`,
    /// bound by the receive parameters of `context`.
    pub fn new(reader: R, context: C) -> Self {
        let input = PduInput {
            reader,
            buffer: Vec::new(),
            pos: 0,
            message_control: 0,
            pdv_end: 0,
            max_pdu_length: context.max_pdu_length_receive(),
            strict: context.strict(),
            failure: None,
        };
        PduDecoder { input, context }
    }

    /// The association parameters driving this decoder.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Retrieve the underlying reader,
    /// dropping any bytes buffered from the current PDU.
    pub fn into_inner(self) -> R {
        self.input.reader
    }

    /// Read and handle the next PDU.
    ///
    /// All DIMSE messages started in a P-DATA-TF PDU
    /// are decoded up to their end,
    /// even if this means reading more PDUs.
    ///
    /// On error, the connection cannot be used any further.
    /// [`Error::abort_source`] tells whether an A-ABORT should be sent.
    pub fn next_pdu<H>(&mut self, handler: &mut H) -> Result<()>
    where
        H: ?Sized + AssociationHandler,
    {
        let result = self.next_pdu_impl(handler);
        if let Err(e) = &result {
            match e {
                Error::UnexpectedPdu { pdu, .. } => dispatch(handler, (**pdu).clone()),
                e => {
                    if let Some(io) = e.transport_error() {
                        handler.on_transport_error(io);
                    }
                }
            }
        }
        result
    }

    fn next_pdu_impl<H>(&mut self, handler: &mut H) -> Result<()>
    where
        H: ?Sized + AssociationHandler,
    {
        let pdu_type = self.input.read_pdu()?;
        if pdu_type != pdu_type::P_DATA_TF {
            let pdu = read_pdu_body(pdu_type, &self.input.buffer).context(ReceivePduSnafu)?;
            self.input.pos = self.input.buffer.len();
            debug!("Received {}", pdu.short_description());
            dispatch(handler, pdu);
            return Ok(());
        }

        debug!("Received P-DATA-TF of {} bytes", self.input.buffer.len());
        handler.on_data_available();
        while self.input.has_remaining() {
            self.decode_dimse(handler)?;
        }
        Ok(())
    }

    fn decode_dimse<H>(&mut self, handler: &mut H) -> Result<()>
    where
        H: ?Sized + AssociationHandler,
    {
        self.input.failure = None;
        let pcid = self.input.next_pdv(PDataValueType::Command, None)?;
        let pc = match self.context.presentation_context(pcid) {
            Some(pc) if pc.is_accepted() => pc,
            Some(_) => {
                warn!("No accepted presentation context with ID {}", pcid);
                return NoPresentationContextSnafu { id: pcid }.fail();
            }
            None => {
                warn!("No presentation context with ID {}", pcid);
                return NoPresentationContextSnafu { id: pcid }.fail();
            }
        };

        let command = read_command(&mut self.input, pcid)?;
        let command_field = command::command_field(&command).with_context(|| {
            IllegalCommandFieldSnafu {
                code: command
                    .get(dicom_dictionary_std::tags::COMMAND_FIELD)
                    .and_then(|e| e.to_int::<u16>().ok()),
            }
        })?;
        debug!("Received {} on presentation context {}", command_field, pcid);

        if command_field == CommandField::C_CANCEL_RQ {
            handler.on_cancel(pc, command);
        } else if command::has_dataset(&command) {
            self.input.next_pdv(PDataValueType::Data, Some(pcid))?;
            if command_field.is_response() {
                let mut data = Vec::new();
                let result = PdvReader::new(&mut self.input, pcid)
                    .copy_to(&mut data, None)
                    .context(ReadDataSnafu);
                result.map_err(|e| self.input.take_failure_or(e))?;
                handler.on_dimse_rsp(pc, command_field, command, Some(data));
            } else {
                let result = {
                    let mut reader = PdvReader::new(&mut self.input, pcid);
                    handler
                        .on_dimse_rq(pc, command_field, command, Some(&mut reader))
                        .context(HandleRequestSnafu)
                        .and_then(|_| reader.skip_all().context(ReadDataSnafu))
                };
                let skipped = result.map_err(|e| self.input.take_failure_or(e))?;
                if skipped > 0 {
                    warn!(
                        "{} bytes of {} data set were not consumed",
                        skipped, command_field
                    );
                }
            }
        } else if command_field.is_response() {
            handler.on_dimse_rsp(pc, command_field, command, None);
        } else {
            handler
                .on_dimse_rq(pc, command_field, command, None)
                .context(HandleRequestSnafu)?;
        }
        Ok(())
    }
}

/// Decode the command set whose first fragment was just entered,
/// leaving the input at the end of its last fragment.
fn read_command<R>(input: &mut PduInput<R>, pcid: u8) -> Result<InMemDicomObject>
where
    R: Read,
{
    let result = {
        let mut reader = PdvReader::new(input, pcid);
        command::read_command(&mut reader)
            .map_err(Box::new)
            .context(ReadCommandSnafu)
            .and_then(|command| {
                let skipped = reader.skip_all().context(ReadDataSnafu)?;
                if skipped > 0 {
                    warn!("{} trailing bytes after command set", skipped);
                }
                Ok(command)
            })
    };
    result.map_err(|e| input.take_failure_or(e))
}

fn dispatch<H>(handler: &mut H, pdu: Pdu)
where
    H: ?Sized + AssociationHandler,
{
    match pdu {
        Pdu::AssociationRQ(rq) => handler.on_associate_rq(rq),
        Pdu::AssociationAC(ac) => handler.on_associate_ac(ac),
        Pdu::AssociationRJ(rj) => handler.on_associate_rj(rj),
        Pdu::ReleaseRQ => handler.on_release_rq(),
        Pdu::ReleaseRP => handler.on_release_rp(),
        Pdu::AbortRQ { source } => handler.on_abort(source),
        // P-DATA-TF is demultiplexed instead
        Pdu::PData { .. } => {}
    }
}
