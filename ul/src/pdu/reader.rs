//! PDU reader module
use crate::pdu::wire::{
    decode_ae_title, decode_string, read_item, read_slice, read_u16_prefixed,
    read_u16_prefixed_string, remaining, AE_TITLE_LENGTH,
};
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read};
use tracing::warn;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU header"))]
    ReadPduHeader {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU body"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Unrecognized PDU type {:#04x}", pdu_type))]
    UnrecognizedPdu { pdu_type: u8, backtrace: Backtrace },

    #[snafu(display("Invalid length {} for PDU type {:#04x}", pdu_length, pdu_type))]
    InvalidPduLength {
        pdu_type: u8,
        pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
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

    #[snafu(display("Invalid presentation context result reason {}", value))]
    InvalidPresentationContextResultReason { value: u8, backtrace: Backtrace },

    #[snafu(display("Duplicate presentation context ID {}", id))]
    DuplicatePresentationContextId { id: u8, backtrace: Backtrace },

    #[snafu(display("Invalid reject result, source or reason"))]
    InvalidRejectSourceOrReason { backtrace: Backtrace },

    #[snafu(display("Invalid abort source {}", code))]
    InvalidAbortSource { code: u8, backtrace: Backtrace },

    #[snafu(display("Invalid SOP class common extended negotiation sub-item"))]
    InvalidCommonExtendedNegotiation { backtrace: Backtrace },

    #[snafu(display("Invalid user identity sub-item"))]
    InvalidUserIdentity { backtrace: Backtrace },

    #[snafu(display("User identity server response in A-ASSOCIATE-RQ"))]
    UserIdentityAcInRequest { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The A-ABORT reason to send to the peer
    /// when this error is a protocol violation on its part.
    ///
    /// Returns `None` for transport failures,
    /// which warrant closing the connection without an abort.
    pub fn abort_reason(&self) -> Option<AbortRQServiceProviderReason> {
        match self {
            Error::InvalidMaxPdu { .. }
            | Error::NoPduAvailable { .. }
            | Error::ReadPduHeader { .. }
            | Error::ReadPdu { .. } => None,
            Error::UnrecognizedPdu { .. } => Some(AbortRQServiceProviderReason::UnrecognizedPdu),
            _ => Some(AbortRQServiceProviderReason::InvalidPduParameter),
        }
    }
}

/// Read a single PDU from the given source.
///
/// The body of the PDU is only read after its header was validated
/// against `max_pdu_length`.
/// In non-strict mode, PDUs larger than `max_pdu_length`
/// are tolerated with a warning,
/// up to [`MAXIMUM_PDU_SIZE`].
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: ?Sized + Read,
{
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    let (pdu_type, pdu_length) = read_pdu_header(reader)?;
    check_pdu_header(pdu_type, pdu_length, max_pdu_length, strict)?;

    let mut body = vec![0; pdu_length as usize];
    reader.read_exact(&mut body).context(ReadPduSnafu)?;
    read_pdu_body(pdu_type, &body)
}

/// Read the 6-byte PDU header, returning the PDU type and length.
pub(crate) fn read_pdu_header<R>(reader: &mut R) -> Result<(u8, u32)>
where
    R: ?Sized + Read,
{
    // If we can't read 2 bytes here, that means that there is no PDU
    // available. We still return UnexpectedEof
    // if the stream ends after a PDU has begun.
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduHeaderSnafu);
    }
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduHeaderSnafu)?;
    Ok((bytes[0], pdu_length))
}

/// Validate a PDU header before its body is read.
pub(crate) fn check_pdu_header(
    pdu_type: u8,
    pdu_length: u32,
    max_pdu_length: u32,
    strict: bool,
) -> Result<()> {
    match pdu_type {
        pdu_type::A_ASSOCIATE_RQ | pdu_type::A_ASSOCIATE_AC | pdu_type::P_DATA_TF => {
            ensure!(
                pdu_length >= 4,
                InvalidPduLengthSnafu {
                    pdu_type,
                    pdu_length
                }
            );
            ensure!(
                pdu_length <= MAXIMUM_PDU_SIZE,
                PduTooLargeSnafu {
                    pdu_length,
                    max_pdu_length: MAXIMUM_PDU_SIZE
                }
            );
            if pdu_length > max_pdu_length {
                ensure!(
                    !strict,
                    PduTooLargeSnafu {
                        pdu_length,
                        max_pdu_length
                    }
                );
                warn!(
                    "Incoming pdu was too large: length {}, maximum is {}",
                    pdu_length, max_pdu_length
                );
            }
            Ok(())
        }
        pdu_type::A_ASSOCIATE_RJ
        | pdu_type::A_RELEASE_RQ
        | pdu_type::A_RELEASE_RP
        | pdu_type::A_ABORT => {
            ensure!(
                pdu_length == 4,
                InvalidPduLengthSnafu {
                    pdu_type,
                    pdu_length
                }
            );
            Ok(())
        }
        _ => UnrecognizedPduSnafu { pdu_type }.fail(),
    }
}

/// Parse the body of a PDU whose header was already validated.
pub(crate) fn read_pdu_body(pdu_type: u8, body: &[u8]) -> Result<Pdu> {
    let mut cursor = Cursor::new(body);
    match pdu_type {
        pdu_type::A_ASSOCIATE_RQ => read_negotiation(&mut cursor, true).map(Pdu::AssociationRQ),
        pdu_type::A_ASSOCIATE_AC => read_negotiation(&mut cursor, false).map(Pdu::AssociationAC),
        pdu_type::A_ASSOCIATE_RJ => {
            // A-ASSOCIATE-RJ PDU Structure

            // 7 - Reserved
            // 8 - Result - 1 rejected-permanent, 2 rejected-transient
            // 9 - Source - 1 service-user, 2 service-provider (ACSE),
            //     3 service-provider (presentation)
            // 10 - Reason/Diag. - interpreted relative to the source
            let mut fields = [0u8; 4];
            cursor
                .read_exact(&mut fields)
                .context(ReadPduFieldSnafu { field: "Result" })?;
            let result =
                AssociationRJResult::from(fields[1]).context(InvalidRejectSourceOrReasonSnafu)?;
            let source = AssociationRJSource::from(fields[2], fields[3])
                .context(InvalidRejectSourceOrReasonSnafu)?;
            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        pdu_type::P_DATA_TF => read_pdata_values(&mut cursor).map(|data| Pdu::PData { data }),
        // 7-10 - Reserved - sent as 00000000H but not tested when received
        pdu_type::A_RELEASE_RQ => Ok(Pdu::ReleaseRQ),
        pdu_type::A_RELEASE_RP => Ok(Pdu::ReleaseRP),
        pdu_type::A_ABORT => {
            // A-ABORT PDU Structure

            // 7-8 - Reserved
            // 9 - Source - 0 service-user, 1 reserved, 2 service-provider
            // 10 - Reason/Diag - only significant for a service-provider abort
            let mut fields = [0u8; 4];
            cursor
                .read_exact(&mut fields)
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let source = AbortRQSource::from(fields[2], fields[3])
                .context(InvalidAbortSourceSnafu { code: fields[2] })?;
            Ok(Pdu::AbortRQ { source })
        }
        _ => UnrecognizedPduSnafu { pdu_type }.fail(),
    }
}

fn read_pdata_values(cursor: &mut Cursor<&[u8]>) -> Result<Vec<PDataValue>> {
    let mut values = vec![];
    while remaining(cursor) > 0 {
        // Presentation Data Value Item Structure

        // 1-4 - Item-length - from the presentation context ID
        // to the end of the presentation data value
        let length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
            field: "Item-Length",
        })?;
        let available = remaining(cursor);
        ensure!(
            length >= 2 && length as usize <= available,
            InvalidPdvLengthSnafu { length, available }
        );

        // 5 - Presentation-context-ID
        let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
            field: "Presentation-context-ID",
        })?;

        // 6 - Message Control Header
        //   bit 0: 1 = command, 0 = data set
        //   bit 1: 1 = last fragment
        let header = cursor.read_u8().context(ReadPduFieldSnafu {
            field: "Message Control Header",
        })?;

        let data = read_slice(cursor, length as usize - 2)
            .context(ReadPduFieldSnafu {
                field: "Presentation-data-value",
            })?
            .to_vec();

        values.push(PDataValue {
            presentation_context_id,
            value_type: PDataValueType::from_message_control(header),
            is_last: header & message_control::LAST != 0,
            data,
        });
    }
    Ok(values)
}

/// Parse the body of an A-ASSOCIATE-RQ or A-ASSOCIATE-AC PDU.
fn read_negotiation(cursor: &mut Cursor<&[u8]>, request: bool) -> Result<Negotiation> {
    // 7-8 - Protocol-version - bit 0 identifies version 1,
    // which is the only bit a receiver shall test
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;
    if protocol_version & 1 == 0 {
        warn!(
            "Protocol version {:#06x} does not include version 1",
            protocol_version
        );
    }

    // 9-10 - Reserved
    cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Reserved",
    })?;

    // 11-26 - Called-AE-title, 27-42 - Calling-AE-title
    // (in an A-ASSOCIATE-AC, the values received in the request)
    let called_ae_title = read_slice(cursor, AE_TITLE_LENGTH)
        .and_then(decode_ae_title)
        .context(ReadPduFieldSnafu {
            field: "Called-AE-title",
        })?;
    let calling_ae_title = read_slice(cursor, AE_TITLE_LENGTH)
        .and_then(decode_ae_title)
        .context(ReadPduFieldSnafu {
            field: "Calling-AE-title",
        })?;

    // 43-74 - Reserved
    let mut reserved = [0; 32];
    cursor
        .read_exact(&mut reserved)
        .context(ReadPduFieldSnafu { field: "Reserved" })?;

    let mut negotiation = Negotiation {
        protocol_version,
        called_ae_title,
        calling_ae_title,
        reserved,
        application_context_name: String::new(),
        presentation_contexts: Vec::new(),
        max_pdu_length: 0,
        max_ops_invoked: 1,
        max_ops_performed: 1,
        implementation_class_uid: String::new(),
        implementation_version_name: None,
        role_selections: Default::default(),
        extended_negotiations: Default::default(),
        common_extended_negotiations: Default::default(),
        user_identity: None,
        user_identity_ac: None,
    };

    // 75-xxx - Variable items: one Application Context Item,
    // one or more Presentation Context Items and one User Information Item
    while remaining(cursor) > 0 {
        let (item_type, content) = read_item(cursor).context(ReadPduFieldSnafu {
            field: "Variable item",
        })?;
        match item_type {
            item_type::APPLICATION_CONTEXT => {
                negotiation.application_context_name =
                    decode_string(content).context(ReadPduFieldSnafu {
                        field: "Application-context-name",
                    })?;
            }
            item_type::PRESENTATION_CONTEXT_RQ | item_type::PRESENTATION_CONTEXT_AC => {
                let pc = read_presentation_context(content, request)?;
                let id = pc.id;
                ensure!(
                    negotiation.add_presentation_context(pc),
                    DuplicatePresentationContextIdSnafu { id }
                );
            }
            item_type::USER_INFORMATION => {
                read_user_information(content, &mut negotiation, request)?;
            }
            _ => {
                warn!(
                    "Skipping unknown item type {:#04x} ({} bytes)",
                    item_type,
                    content.len()
                );
            }
        }
    }

    Ok(negotiation)
}

fn read_presentation_context(content: &[u8], request: bool) -> Result<PresentationContext> {
    let mut cursor = Cursor::new(content);

    // 5 - Presentation-context-ID
    // 6 - Reserved
    // 7 - Result/Reason (reserved in a request)
    // 8 - Reserved
    let mut fields = [0u8; 4];
    cursor.read_exact(&mut fields).context(ReadPduFieldSnafu {
        field: "Presentation-context-ID",
    })?;
    let id = fields[0];
    let reason = if request {
        PresentationContextResultReason::Acceptance
    } else {
        PresentationContextResultReason::from(fields[2])
            .context(InvalidPresentationContextResultReasonSnafu { value: fields[2] })?
    };

    // 9-xxx - Abstract/Transfer Syntax Sub-Items
    let mut abstract_syntax = None;
    let mut transfer_syntaxes = vec![];
    while remaining(&cursor) > 0 {
        let (item_type, content) = read_item(&mut cursor).context(ReadPduFieldSnafu {
            field: "Presentation context sub-item",
        })?;
        match item_type {
            item_type::ABSTRACT_SYNTAX => {
                abstract_syntax = Some(decode_string(content).context(ReadPduFieldSnafu {
                    field: "Abstract-syntax-name",
                })?);
            }
            item_type::TRANSFER_SYNTAX => {
                transfer_syntaxes.push(decode_string(content).context(ReadPduFieldSnafu {
                    field: "Transfer-syntax-name",
                })?);
            }
            _ => {
                warn!(
                    "Skipping unknown presentation context sub-item type {:#04x}",
                    item_type
                );
            }
        }
    }

    Ok(PresentationContext {
        id,
        reason,
        abstract_syntax,
        transfer_syntaxes,
    })
}

fn read_user_information(
    content: &[u8],
    negotiation: &mut Negotiation,
    request: bool,
) -> Result<()> {
    let mut cursor = Cursor::new(content);
    while remaining(&cursor) > 0 {
        let (item_type, content) = read_item(&mut cursor).context(ReadPduFieldSnafu {
            field: "User information sub-item",
        })?;
        let mut sub = Cursor::new(content);
        match item_type {
            item_type::MAX_PDU_LENGTH => {
                negotiation.max_pdu_length = sub.read_u32::<BigEndian>().context(
                    ReadPduFieldSnafu {
                        field: "Maximum-length-received",
                    },
                )?;
            }
            item_type::IMPLEMENTATION_CLASS_UID => {
                negotiation.implementation_class_uid =
                    decode_string(content).context(ReadPduFieldSnafu {
                        field: "Implementation-class-uid",
                    })?;
            }
            item_type::ASYNC_OPS_WINDOW => {
                negotiation.max_ops_invoked = sub.read_u16::<BigEndian>().context(
                    ReadPduFieldSnafu {
                        field: "Maximum-number-operations-invoked",
                    },
                )?;
                negotiation.max_ops_performed = sub.read_u16::<BigEndian>().context(
                    ReadPduFieldSnafu {
                        field: "Maximum-number-operations-performed",
                    },
                )?;
            }
            item_type::ROLE_SELECTION => {
                let sop_class_uid =
                    read_u16_prefixed_string(&mut sub).context(ReadPduFieldSnafu {
                        field: "SOP-class-uid",
                    })?;
                let scu_role = sub
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "SCU-role" })?;
                let scp_role = sub
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "SCP-role" })?;
                negotiation.add_role_selection(RoleSelection::new(
                    sop_class_uid,
                    scu_role != 0,
                    scp_role != 0,
                ));
            }
            item_type::IMPLEMENTATION_VERSION_NAME => {
                negotiation.implementation_version_name =
                    Some(decode_string(content).context(ReadPduFieldSnafu {
                        field: "Implementation-version-name",
                    })?);
            }
            item_type::SOP_CLASS_EXTENDED_NEGOTIATION => {
                // the service-class-application-information
                // takes up the rest of the sub-item
                let sop_class_uid =
                    read_u16_prefixed_string(&mut sub).context(ReadPduFieldSnafu {
                        field: "SOP-class-uid",
                    })?;
                let info = content[sub.position() as usize..].to_vec();
                negotiation.add_extended_negotiation(sop_class_uid, info);
            }
            item_type::SOP_CLASS_COMMON_EXTENDED_NEGOTIATION => {
                let cen = read_common_extended_negotiation(&mut sub)
                    .context(InvalidCommonExtendedNegotiationSnafu)?;
                negotiation.add_common_extended_negotiation(cen);
            }
            item_type::USER_IDENTITY_RQ => {
                let identity = read_user_identity(&mut sub);
                ensure!(
                    identity.is_some() && remaining(&sub) == 0,
                    InvalidUserIdentitySnafu
                );
                if let Some(identity) = identity {
                    if let UserIdentityType::Other(code) = identity.identity_type {
                        warn!("User identity of unknown type {}", code);
                    }
                    negotiation.user_identity = Some(identity);
                }
            }
            item_type::USER_IDENTITY_AC => {
                ensure!(!request, UserIdentityAcInRequestSnafu);
                let server_response = read_u16_prefixed(&mut sub).ok();
                ensure!(
                    server_response.is_some() && remaining(&sub) == 0,
                    InvalidUserIdentitySnafu
                );
                negotiation.user_identity_ac = server_response
                    .map(|response| UserIdentityAC::new(response.to_vec()));
            }
            _ => {
                warn!(
                    "Skipping unknown user information sub-item type {:#04x} ({} bytes)",
                    item_type,
                    content.len()
                );
            }
        }
    }
    Ok(())
}

/// Parse the content of a SOP class common extended negotiation sub-item.
///
/// The related general SOP class identification block
/// must be consumed exactly by the UIDs it contains.
/// Any bytes after that block are ignored.
fn read_common_extended_negotiation(
    cursor: &mut Cursor<&[u8]>,
) -> Option<CommonExtendedNegotiation> {
    let sop_class_uid = read_u16_prefixed_string(cursor).ok()?;
    let service_class_uid = read_u16_prefixed_string(cursor).ok()?;
    let related_block = read_u16_prefixed(cursor).ok()?;

    let mut related = Cursor::new(related_block);
    let mut related_general_sop_class_uids = Vec::new();
    while remaining(&related) > 0 {
        related_general_sop_class_uids.push(read_u16_prefixed_string(&mut related).ok()?);
    }

    Some(CommonExtendedNegotiation {
        sop_class_uid,
        service_class_uid,
        related_general_sop_class_uids,
    })
}

/// Parse the content of a user identity negotiation request sub-item.
///
/// Returns `None` if the content is malformed.
fn read_user_identity(cursor: &mut Cursor<&[u8]>) -> Option<UserIdentity> {
    let identity_type = cursor.read_u8().ok()?;
    let positive_response_requested = cursor.read_u8().ok()? != 0;
    let primary_field = read_u16_prefixed(cursor).ok()?.to_vec();
    let secondary_field = read_u16_prefixed(cursor).ok()?.to_vec();

    Some(UserIdentity::new(
        positive_response_requested,
        UserIdentityType::from(identity_type),
        primary_field,
        secondary_field,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    fn header(pdu_type: u8, length: u32) -> Vec<u8> {
        let mut bytes = vec![pdu_type, 0];
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes
    }

    #[test]
    fn oversized_header_rejected_before_body() {
        // only the header is available, reading the body would fail
        let bytes = header(pdu_type::P_DATA_TF, 0x0100_0001);
        let err = read_pdu(&mut &bytes[..], MAXIMUM_PDU_SIZE, false).unwrap_err();
        assert_matches!(err, Error::PduTooLarge { pdu_length: 0x0100_0001, .. });
        assert_eq!(
            err.abort_reason(),
            Some(AbortRQServiceProviderReason::InvalidPduParameter)
        );
    }

    #[test]
    fn strict_mode_applies_local_maximum() {
        let bytes = header(pdu_type::P_DATA_TF, DEFAULT_MAX_PDU + 1);
        let err = read_pdu(&mut &bytes[..], DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::PduTooLarge { .. });
    }

    #[test]
    fn fixed_length_pdus_must_be_four_bytes() {
        let mut bytes = header(pdu_type::A_RELEASE_RQ, 5);
        bytes.extend_from_slice(&[0; 5]);
        let err = read_pdu(&mut &bytes[..], DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::InvalidPduLength { pdu_length: 5, .. });

        let mut bytes = header(pdu_type::A_ABORT, 4);
        bytes.extend_from_slice(&[0, 0, 2, 5]);
        let pdu = read_pdu(&mut &bytes[..], DEFAULT_MAX_PDU, true).unwrap();
        assert_eq!(
            pdu,
            Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnexpectedPduParameter
                )
            }
        );
    }

    #[test]
    fn unknown_pdu_type_is_unrecognized() {
        let mut bytes = header(0x09, 4);
        bytes.extend_from_slice(&[0; 4]);
        let err = read_pdu(&mut &bytes[..], DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::UnrecognizedPdu { pdu_type: 0x09, .. });
        assert_eq!(
            err.abort_reason(),
            Some(AbortRQServiceProviderReason::UnrecognizedPdu)
        );
    }

    #[test]
    fn empty_source_has_no_pdu() {
        let err = read_pdu(&mut &b""[..], DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::NoPduAvailable { .. });
        assert_eq!(err.abort_reason(), None);
    }

    #[test]
    fn pdv_length_below_two_is_invalid() {
        let mut bytes = header(pdu_type::P_DATA_TF, 6);
        bytes.extend_from_slice(&[0, 0, 0, 1, 1, 3]);
        let err = read_pdu(&mut &bytes[..], DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::InvalidPdvLength { length: 1, .. });
    }

    #[test]
    fn pdv_length_beyond_pdu_is_invalid() {
        let mut bytes = header(pdu_type::P_DATA_TF, 8);
        bytes.extend_from_slice(&[0, 0, 0, 5, 1, 3, 0xAA, 0xBB]);
        let err = read_pdu(&mut &bytes[..], DEFAULT_MAX_PDU, true).unwrap_err();
        assert_matches!(err, Error::InvalidPdvLength { length: 5, available: 4, .. });
    }

    #[test]
    fn common_extended_negotiation_related_block_must_match() {
        // related block declares 10 bytes but holds a 12-byte UID entry
        let mut content = vec![];
        content.extend_from_slice(&[0, 3]);
        content.extend_from_slice(b"1.2");
        content.extend_from_slice(&[0, 3]);
        content.extend_from_slice(b"1.3");
        content.extend_from_slice(&[0, 10]);
        content.extend_from_slice(&[0, 10]);
        content.extend_from_slice(b"1.2.3.4.56");
        let mut cursor = Cursor::new(&content[..]);
        assert_eq!(read_common_extended_negotiation(&mut cursor), None);

        // well formed
        let mut content = vec![];
        content.extend_from_slice(&[0, 3]);
        content.extend_from_slice(b"1.2");
        content.extend_from_slice(&[0, 3]);
        content.extend_from_slice(b"1.3");
        content.extend_from_slice(&[0, 7]);
        content.extend_from_slice(&[0, 5]);
        content.extend_from_slice(b"1.2.4");
        let mut cursor = Cursor::new(&content[..]);
        assert_eq!(
            read_common_extended_negotiation(&mut cursor),
            Some(CommonExtendedNegotiation::new("1.2", "1.3", ["1.2.4"]))
        );
    }

    #[test]
    fn user_identity_must_fill_its_item() {
        let content = [1, 0, 0, 3, b'b', b'o', b'b', 0, 0, 0xFF];
        let mut negotiation = Negotiation::default();
        let mut user_info = vec![item_type::USER_IDENTITY_RQ, 0, 0, content.len() as u8];
        user_info.extend_from_slice(&content);
        let err = read_user_information(&user_info, &mut negotiation, true).unwrap_err();
        assert_matches!(err, Error::InvalidUserIdentity { .. });

        let content = [1, 1, 0, 3, b'b', b'o', b'b', 0, 0];
        let mut user_info = vec![item_type::USER_IDENTITY_RQ, 0, 0, content.len() as u8];
        user_info.extend_from_slice(&content);
        read_user_information(&user_info, &mut negotiation, true).unwrap();
        assert_eq!(
            negotiation.user_identity,
            Some(UserIdentity::new(
                true,
                UserIdentityType::Username,
                b"bob".to_vec(),
                vec![]
            ))
        );
    }

    #[test]
    fn user_identity_response_only_in_accept() {
        let user_info = [item_type::USER_IDENTITY_AC, 0, 0, 4, 0, 2, b'o', b'k'];

        let mut negotiation = Negotiation::default();
        let err = read_user_information(&user_info, &mut negotiation, true).unwrap_err();
        assert_matches!(err, Error::UserIdentityAcInRequest { .. });
        assert_eq!(
            err.abort_reason(),
            Some(AbortRQServiceProviderReason::InvalidPduParameter)
        );
        assert_eq!(negotiation.user_identity_ac, None);

        read_user_information(&user_info, &mut negotiation, false).unwrap();
        assert_eq!(
            negotiation.user_identity_ac,
            Some(UserIdentityAC::new(b"ok".to_vec()))
        );
    }
}
