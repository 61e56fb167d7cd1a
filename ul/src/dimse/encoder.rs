//! DIMSE message encoder
//!
//! The [`PduEncoder`] writes PDUs to the transport.
//! DIMSE messages are split into presentation data values
//! and packed into P-DATA-TF PDUs
//! no larger than the maximum length accepted by the peer.
//! The PDU buffer is reused across messages
//! and never grows past that maximum.
//!
//! Each message is written as a whole under a lock,
//! so that the fragments of messages sent from different threads
//! are never interleaved on the wire.
use std::io::{ErrorKind, Read, Write};
use std::sync::{Mutex, PoisonError};

use byteordered::byteorder::{BigEndian, ByteOrder};
use dicom_encoding::TransferSyntaxIndex;
use dicom_object::{InMemDicomObject, WriteError};
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tracing::{debug, trace};

use crate::association::AssociationContext;
use crate::dimse::command;
use crate::pdu::writer::{self, fixed_pdu};
use crate::pdu::{
    message_control, pdu_type, AbortRQSource, AssociationRJ, Negotiation, Pdu,
    PresentationContext, MAXIMUM_PDU_SIZE, PDU_HEADER_SIZE, PDV_HEADER_SIZE,
};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not encode PDU"))]
    EncodePdu {
        #[snafu(backtrace)]
        source: writer::Error,
    },

    #[snafu(display("Could not send PDU"))]
    SendPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("P-DATA-TF PDUs may not be sent in the current association state"))]
    PDataNotAllowed { backtrace: Backtrace },

    #[snafu(display("Illegal DIMSE command field"))]
    IllegalCommandField { backtrace: Backtrace },

    #[snafu(display("Presentation context {} has no transfer syntax", id))]
    NoTransferSyntax { id: u8, backtrace: Backtrace },

    #[snafu(display("Could not encode command set"))]
    WriteCommand {
        source: Box<WriteError>,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not write message data"))]
    WriteData {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Byte sink for the fragments of a single data set.
pub trait PdvOutput: Write {
    /// Copy bytes from the given source,
    /// either exactly `length` bytes or up to the end of the source.
    ///
    /// Running out of bytes before `length` is reached
    /// is an [`UnexpectedEof`](std::io::ErrorKind::UnexpectedEof) error.
    fn copy_from(&mut self, from: &mut dyn Read, length: Option<u64>) -> std::io::Result<u64>;
}

/// A producer of the data set of an outgoing DIMSE message.
pub trait DataWriter {
    /// Write the data set in the given transfer syntax.
    fn write_to(&mut self, out: &mut dyn PdvOutput, transfer_syntax: &str) -> std::io::Result<()>;
}

/// Data already encoded in the transfer syntax of the presentation context.
impl DataWriter for &[u8] {
    fn write_to(&mut self, out: &mut dyn PdvOutput, _transfer_syntax: &str) -> std::io::Result<()> {
        out.write_all(self)
    }
}

/// Data already encoded in the transfer syntax of the presentation context.
impl DataWriter for Vec<u8> {
    fn write_to(&mut self, out: &mut dyn PdvOutput, _transfer_syntax: &str) -> std::io::Result<()> {
        out.write_all(self)
    }
}

impl DataWriter for InMemDicomObject {
    fn write_to(&mut self, out: &mut dyn PdvOutput, transfer_syntax: &str) -> std::io::Result<()> {
        let ts = TransferSyntaxRegistry.get(transfer_syntax).ok_or_else(|| {
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("Unsupported transfer syntax {}", transfer_syntax),
            )
        })?;
        self.write_dataset_with_ts(out, ts)
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))
    }
}

/// The P-DATA-TF PDU under construction.
#[derive(Debug)]
struct PduBuffer {
    /// the whole PDU, header included
    buf: Vec<u8>,
    /// maximum length of `buf`
    limit: usize,
    /// start of the header of the PDV in progress
    pdv_pos: usize,
    pcid: u8,
    /// command or data bit of the PDV in progress
    kind: u8,
    /// an encoding error hidden behind an I/O error by a PDV writer
    failure: Option<Error>,
}

impl PduBuffer {
    fn new() -> Self {
        PduBuffer {
            buf: Vec::new(),
            limit: 0,
            pdv_pos: 0,
            pcid: 0,
            kind: message_control::COMMAND,
            failure: None,
        }
    }

    /// Prepare for a new message,
    /// with room for the PDU header and the first PDV header.
    fn reset(&mut self, max_pdu_length: u32, pcid: u8) {
        self.limit = (max_pdu_length + PDU_HEADER_SIZE) as usize;
        self.buf.clear();
        self.buf
            .resize((PDU_HEADER_SIZE + PDV_HEADER_SIZE) as usize, 0);
        self.pdv_pos = PDU_HEADER_SIZE as usize;
        self.pcid = pcid;
        self.kind = message_control::COMMAND;
        self.failure = None;
    }

    fn free(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    /// Start another PDV in the current PDU.
    fn start_pdv(&mut self) {
        self.pdv_pos = self.buf.len();
        self.buf
            .resize(self.buf.len() + PDV_HEADER_SIZE as usize, 0);
    }

    /// Fill in the header of the PDV in progress.
    fn encode_pdv_header(&mut self, last: u8) {
        let pdv_length = (self.buf.len() - self.pdv_pos - 4) as u32;
        let header = &mut self.buf[self.pdv_pos..self.pdv_pos + PDV_HEADER_SIZE as usize];
        BigEndian::write_u32(&mut header[..4], pdv_length);
        header[4] = self.pcid;
        header[5] = self.kind | last;
        trace!(
            "PDV length {}, presentation context {}, message control {:#04x}",
            pdv_length,
            self.pcid,
            self.kind | last
        );
    }

    /// Fill in the PDU header.
    fn encode_pdu_header(&mut self) -> u32 {
        let pdu_length = (self.buf.len() - PDU_HEADER_SIZE as usize) as u32;
        self.buf[0] = pdu_type::P_DATA_TF;
        self.buf[1] = 0;
        BigEndian::write_u32(&mut self.buf[2..6], pdu_length);
        pdu_length
    }

    /// Keep room for the PDU header and the next PDV header only.
    fn clear(&mut self) {
        self.buf
            .truncate((PDU_HEADER_SIZE + PDV_HEADER_SIZE) as usize);
        self.pdv_pos = PDU_HEADER_SIZE as usize;
    }
}

/// The writer of the fragments of one DIMSE message.
pub struct PdvWriter<'a, W, C> {
    buffer: &'a mut PduBuffer,
    output: &'a Mutex<W>,
    context: &'a C,
}

impl<W, C> PdvWriter<'_, W, C>
where
    W: Write,
    C: AssociationContext,
{
    /// Send the P-DATA-TF PDU in the buffer.
    fn send_pdu(&mut self) -> Result<()> {
        if !self.context.can_send_pdata() {
            return PDataNotAllowedSnafu.fail();
        }
        let pdu_length = self.buffer.encode_pdu_header();
        trace!("Sending P-DATA-TF of {} bytes", pdu_length);
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output
            .write_all(&self.buffer.buf)
            .and_then(|_| output.flush())
            .map_err(|e| {
                self.context.on_transport_error(&e);
                e
            })
            .context(SendPduSnafu)?;
        self.buffer.clear();
        Ok(())
    }

    /// Send the buffered PDU if there is no room left in it.
    fn flush_if_full(&mut self) -> std::io::Result<()> {
        if self.buffer.free() > 0 {
            return Ok(());
        }
        self.buffer.encode_pdv_header(message_control::PENDING);
        self.send_pdu().map_err(|e| self.stash(e))
    }

    /// Keep an encoder error aside,
    /// returning an I/O error to pass through the data writer.
    fn stash(&mut self, error: Error) -> std::io::Error {
        let kind = match &error {
            Error::SendPdu { source, .. } => source.kind(),
            _ => ErrorKind::Other,
        };
        let io = std::io::Error::new(kind, error.to_string());
        self.buffer.failure = Some(error);
        io
    }

    fn take_failure_or(&mut self, error: Error) -> Error {
        self.buffer.failure.take().unwrap_or(error)
    }

    /// Mark the PDV in progress as the last one of its command or data set.
    fn close(&mut self) {
        self.buffer.encode_pdv_header(message_control::LAST);
    }
}

impl<W, C> Write for PdvWriter<'_, W, C>
where
    W: Write,
    C: AssociationContext,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.flush_if_full()?;
        let n = buf.len().min(self.buffer.free());
        self.buffer.buf.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // PDUs are only sent once full or at the end of the message
        Ok(())
    }
}

impl<W, C> PdvOutput for PdvWriter<'_, W, C>
where
    W: Write,
    C: AssociationContext,
{
    fn copy_from(&mut self, from: &mut dyn Read, length: Option<u64>) -> std::io::Result<u64> {
        let mut copied = 0;
        while length != Some(copied) {
            self.flush_if_full()?;
            let mut n = self.buffer.free();
            if let Some(length) = length {
                n = n.min((length - copied) as usize);
            }
            let start = self.buffer.buf.len();
            self.buffer.buf.resize(start + n, 0);
            let read = match from.read(&mut self.buffer.buf[start..]) {
                Ok(read) => read,
                Err(e) => {
                    self.buffer.buf.truncate(start);
                    if e.kind() == ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(e);
                }
            };
            self.buffer.buf.truncate(start + read);
            if read == 0 {
                return match length {
                    None => Ok(copied),
                    Some(length) => Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("{} bytes remaining", length - copied),
                    )),
                };
            }
            copied += read as u64;
        }
        Ok(copied)
    }
}

/// An encoder of the PDUs sent through an association.
///
/// The encoder can be shared between threads.
/// DIMSE messages are sent one at a time,
/// while association control PDUs may be sent between two PDUs
/// of a message in progress.
#[derive(Debug)]
pub struct PduEncoder<W, C> {
    output: Mutex<W>,
    pdata: Mutex<PduBuffer>,
    context: C,
}

impl<W, C> PduEncoder<W, C>
where
    W: Write,
    C: AssociationContext,
{
    /// Create an encoder writing to `writer`,
    /// bound by the send parameters of `context`.
    pub fn new(writer: W, context: C) -> Self {
        PduEncoder {
            output: Mutex::new(writer),
            pdata: Mutex::new(PduBuffer::new()),
            context,
        }
    }

    /// The association parameters driving this encoder.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Retrieve the underlying writer.
    pub fn into_inner(self) -> W {
        self.output
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output
            .write_all(bytes)
            .and_then(|_| output.flush())
            .map_err(|e| {
                self.context.on_transport_error(&e);
                e
            })
            .context(SendPduSnafu)
    }

    fn send_pdu(&self, pdu: &Pdu) -> Result<()> {
        let mut bytes = Vec::new();
        writer::write_pdu(&mut bytes, pdu).context(EncodePduSnafu)?;
        debug!("Sending {}", pdu.short_description());
        self.send(&bytes)
    }

    /// Send an A-ASSOCIATE-RQ PDU.
    pub fn write_associate_rq(&self, rq: Negotiation) -> Result<()> {
        self.send_pdu(&Pdu::AssociationRQ(rq))
    }

    /// Send an A-ASSOCIATE-AC PDU.
    pub fn write_associate_ac(&self, ac: Negotiation) -> Result<()> {
        self.send_pdu(&Pdu::AssociationAC(ac))
    }

    /// Send an A-ASSOCIATE-RJ PDU.
    pub fn write_reject(&self, rj: AssociationRJ) -> Result<()> {
        let (source, reason) = rj.source.codes();
        debug!("Sending A-ASSOCIATE-RJ: {}", rj);
        self.send(&fixed_pdu(
            pdu_type::A_ASSOCIATE_RJ,
            rj.result as u8,
            source,
            reason,
        ))
    }

    /// Send an A-ABORT PDU.
    pub fn write_abort(&self, source: AbortRQSource) -> Result<()> {
        let (source_code, reason) = source.codes();
        debug!("Sending A-ABORT: {}", source);
        self.send(&fixed_pdu(pdu_type::A_ABORT, 0, source_code, reason))
    }

    /// Send an A-RELEASE-RQ PDU.
    pub fn write_release_rq(&self) -> Result<()> {
        debug!("Sending A-RELEASE-RQ");
        self.send(&fixed_pdu(pdu_type::A_RELEASE_RQ, 0, 0, 0))
    }

    /// Send an A-RELEASE-RP PDU.
    pub fn write_release_rp(&self) -> Result<()> {
        debug!("Sending A-RELEASE-RP");
        self.send(&fixed_pdu(pdu_type::A_RELEASE_RP, 0, 0, 0))
    }

    /// Send a DIMSE message through the given presentation context.
    ///
    /// The command set is encoded in Implicit VR Little Endian.
    /// The data set, if any,
    /// is produced by `data` in the transfer syntax of the presentation context,
    /// and starts in the same PDU as the end of the command
    /// if the association context allows it.
    pub fn write_dimse(
        &self,
        pc: &PresentationContext,
        command: &InMemDicomObject,
        data: Option<&mut dyn DataWriter>,
    ) -> Result<()> {
        let command_field = command::command_field(command).context(IllegalCommandFieldSnafu)?;
        let transfer_syntax = if data.is_some() {
            pc.transfer_syntax()
                .filter(|ts| !ts.is_empty())
                .context(NoTransferSyntaxSnafu { id: pc.id })?
        } else {
            ""
        };

        let mut buffer = self.pdata.lock().unwrap_or_else(PoisonError::into_inner);
        if !command_field.is_response()
            || !command::status(command).map_or(false, command::is_pending_status)
        {
            self.context.record_sent(command_field);
        }
        debug!(
            "Sending {} on presentation context {}",
            command_field, pc.id
        );

        buffer.reset(self.max_pdu_length(), pc.id);
        let mut out = PdvWriter {
            buffer: &mut *buffer,
            output: &self.output,
            context: &self.context,
        };

        command::write_command(command, &mut out)
            .map_err(Box::new)
            .context(WriteCommandSnafu)
            .map_err(|e| out.take_failure_or(e))?;
        out.close();

        if let Some(data) = data {
            // packed data starts in the command's PDU only when
            // its header and at least one byte still fit there
            if !self.context.pack_pdv() || out.buffer.free() <= PDV_HEADER_SIZE as usize {
                out.send_pdu()?;
            } else {
                out.buffer.start_pdv();
            }
            out.buffer.kind = message_control::DATA;
            data.write_to(&mut out, transfer_syntax)
                .context(WriteDataSnafu)
                .map_err(|e| out.take_failure_or(e))?;
            out.close();
        }
        out.send_pdu()
    }

    /// The effective maximum length of the PDUs sent.
    fn max_pdu_length(&self) -> u32 {
        match self.context.max_pdu_length_send() {
            0 => MAXIMUM_PDU_SIZE,
            max => max.clamp(PDV_HEADER_SIZE + 1, MAXIMUM_PDU_SIZE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::AssociationOptions;
    use crate::pdu::{read_pdu, PDataValueType, PresentationContext};
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::tags;

    const SC_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";
    const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

    struct Limits {
        max_pdu_length: u32,
        pack_pdv: bool,
        pc: PresentationContext,
    }

    impl AssociationContext for Limits {
        fn presentation_context(&self, id: u8) -> Option<&PresentationContext> {
            Some(&self.pc).filter(|pc| pc.id == id)
        }

        fn max_pdu_length_send(&self) -> u32 {
            self.max_pdu_length
        }

        fn max_pdu_length_receive(&self) -> u32 {
            self.max_pdu_length
        }

        fn pack_pdv(&self) -> bool {
            self.pack_pdv
        }
    }

    fn c_store_rq() -> InMemDicomObject {
        InMemDicomObject::command_from_element_iter([
            DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, SC_IMAGE_STORAGE),
            DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0001])),
            DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [1])),
            DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0x0000])),
            DataElement::new(
                tags::COMMAND_DATA_SET_TYPE,
                VR::US,
                dicom_value!(U16, [0x0001]),
            ),
            DataElement::new(tags::AFFECTED_SOP_INSTANCE_UID, VR::UI, "1.2.3.4.5"),
        ])
    }

    fn read_all(mut bytes: &[u8], max_pdu_length: u32) -> Vec<Pdu> {
        let mut pdus = Vec::new();
        while !bytes.is_empty() {
            pdus.push(read_pdu(&mut bytes, max_pdu_length, true).unwrap());
        }
        pdus
    }

    #[test]
    fn small_message_fits_in_one_pdu() {
        let limits = Limits {
            max_pdu_length: 16_384,
            pack_pdv: true,
            pc: PresentationContext::accepted(1, EXPLICIT_VR_LE),
        };
        let encoder = PduEncoder::new(Vec::new(), &limits);
        let mut data: &[u8] = &[0x55; 100];
        encoder
            .write_dimse(&limits.pc, &c_store_rq(), Some(&mut data))
            .unwrap();

        let pdus = read_all(&encoder.into_inner(), 16_384);
        assert_eq!(pdus.len(), 1);
        let Pdu::PData { data } = &pdus[0] else {
            panic!("expected P-DATA-TF, got {:?}", pdus[0]);
        };
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].value_type, PDataValueType::Command);
        assert!(data[0].is_last);
        assert_eq!(data[1].value_type, PDataValueType::Data);
        assert!(data[1].is_last);
        assert_eq!(data[1].data, vec![0x55; 100]);
    }

    #[test]
    fn pdus_respect_the_maximum_length() {
        let limits = Limits {
            max_pdu_length: 4_096,
            pack_pdv: false,
            pc: PresentationContext::accepted(1, EXPLICIT_VR_LE),
        };
        let encoder = PduEncoder::new(Vec::new(), &limits);
        let dataset: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let mut data = dataset.clone();
        encoder
            .write_dimse(&limits.pc, &c_store_rq(), Some(&mut data))
            .unwrap();

        let bytes = encoder.into_inner();
        let pdus = read_all(&bytes, 4_096);
        // 1 command PDU, then 10_000 / (4_096 - 6) rounded up
        assert_eq!(pdus.len(), 4);

        let mut reassembled = Vec::new();
        let mut last_count = 0;
        for pdu in &pdus[1..] {
            let Pdu::PData { data } = pdu else {
                panic!("expected P-DATA-TF, got {:?}", pdu);
            };
            for pdv in data {
                assert_eq!(pdv.value_type, PDataValueType::Data);
                assert!(pdv.data.len() + 6 <= 4_096);
                reassembled.extend_from_slice(&pdv.data);
                last_count += pdv.is_last as usize;
            }
        }
        assert_eq!(last_count, 1);
        assert_eq!(reassembled, dataset);
    }

    #[test]
    fn copy_from_stops_at_the_end_of_the_source() {
        let limits = Limits {
            max_pdu_length: 4_096,
            pack_pdv: true,
            pc: PresentationContext::accepted(1, EXPLICIT_VR_LE),
        };
        struct FromReader<'a>(&'a [u8], Option<u64>);
        impl DataWriter for FromReader<'_> {
            fn write_to(&mut self, out: &mut dyn PdvOutput, _ts: &str) -> std::io::Result<()> {
                let copied = out.copy_from(&mut self.0, self.1)?;
                assert_eq!(copied, 9_000);
                Ok(())
            }
        }

        let source = vec![7; 9_000];
        let encoder = PduEncoder::new(Vec::new(), &limits);
        encoder
            .write_dimse(&limits.pc, &c_store_rq(), Some(&mut FromReader(&source, None)))
            .unwrap();
        let pdus = read_all(&encoder.into_inner(), 4_096);
        assert_eq!(pdus.len(), 3);

        let encoder = PduEncoder::new(Vec::new(), &limits);
        let err = encoder
            .write_dimse(
                &limits.pc,
                &c_store_rq(),
                Some(&mut FromReader(&source, Some(10_000))),
            )
            .unwrap_err();
        assert!(matches!(err, Error::WriteData { .. }));
    }

    #[test]
    fn data_set_requires_a_transfer_syntax() {
        let limits = Limits {
            max_pdu_length: 4_096,
            pack_pdv: true,
            pc: PresentationContext::proposed(1, SC_IMAGE_STORAGE, Vec::<String>::new()),
        };
        let encoder = PduEncoder::new(Vec::new(), &limits);
        let mut data: &[u8] = b"data";
        let err = encoder
            .write_dimse(&limits.pc, &c_store_rq(), Some(&mut data))
            .unwrap_err();
        assert!(matches!(err, Error::NoTransferSyntax { id: 1, .. }));
        assert!(encoder.into_inner().is_empty());
    }

    #[test]
    fn closed_association_refuses_pdata() {
        let mut rq = Negotiation::new("SCU", "SCP");
        rq.add_presentation_context_for(SC_IMAGE_STORAGE, EXPLICIT_VR_LE);
        let mut ac = Negotiation::new("SCU", "SCP");
        ac.add_presentation_context(PresentationContext::accepted(1, EXPLICIT_VR_LE));
        let association = AssociationOptions::new().establish_requestor(&rq, &ac);
        association.close();

        let pc = association.presentation_context(1).unwrap().clone();
        let encoder = PduEncoder::new(Vec::new(), &association);
        let err = encoder.write_dimse(&pc, &c_store_rq(), None).unwrap_err();
        assert!(matches!(err, Error::PDataNotAllowed { .. }));

        // association control PDUs are still allowed
        encoder.write_release_rq().unwrap();
        assert_eq!(encoder.into_inner(), [5, 0, 0, 0, 0, 4, 0, 0, 0, 0]);
    }
}
