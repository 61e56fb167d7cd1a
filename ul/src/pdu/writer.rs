//! PDU writer module
//!
//! Association PDUs are written in a single pass:
//! the length of every PDU, item and sub-item
//! is known in advance from [`Negotiation::length`]
//! and the `length` methods of its components.
use crate::pdu::wire::{
    write_ae_title, write_item_header, write_string_item, write_u16_prefixed,
};
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Could not write field `{}`", field))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not write PDU"))]
    WritePdu {
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Field `{}` is too long to encode ({} bytes)", field, length))]
    FieldTooLong {
        field: &'static str,
        length: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("{} `{}` is longer than 16 characters", field, title))]
    AeTitleTooLong {
        field: &'static str,
        title: String,
        backtrace: Backtrace,
    },

    #[snafu(display("An association request cannot carry a user identity server response"))]
    UserIdentityAcInRequest { backtrace: Backtrace },

    #[snafu(display("PDU length {} exceeds the maximum of {}", length, MAXIMUM_PDU_SIZE))]
    PduTooLarge { length: usize, backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Write a whole PDU to the given destination.
///
/// The PDU is serialized in memory first,
/// so that an invalid PDU is reported
/// before any byte reaches the destination.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: ?Sized + Write,
{
    let bytes = match pdu {
        Pdu::AssociationRQ(rq) => {
            let mut buf = Vec::new();
            write_negotiation(&mut buf, rq, true)?;
            buf
        }
        Pdu::AssociationAC(ac) => {
            let mut buf = Vec::new();
            write_negotiation(&mut buf, ac, false)?;
            buf
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            let (source, reason) = source.codes();
            fixed_pdu(pdu_type::A_ASSOCIATE_RJ, *result as u8, source, reason).to_vec()
        }
        Pdu::PData { data } => {
            let mut buf = Vec::new();
            write_pdata(&mut buf, data)?;
            buf
        }
        Pdu::ReleaseRQ => fixed_pdu(pdu_type::A_RELEASE_RQ, 0, 0, 0).to_vec(),
        Pdu::ReleaseRP => fixed_pdu(pdu_type::A_RELEASE_RP, 0, 0, 0).to_vec(),
        Pdu::AbortRQ { source } => {
            let (source, reason) = source.codes();
            fixed_pdu(pdu_type::A_ABORT, 0, source, reason).to_vec()
        }
    };
    writer.write_all(&bytes).context(WritePduSnafu)
}

/// Build one of the PDUs with a fixed 4-byte body
/// (A-ASSOCIATE-RJ, A-RELEASE-RQ, A-RELEASE-RP and A-ABORT).
///
/// The first byte of the body is always reserved.
pub fn fixed_pdu(pdu_type: u8, b8: u8, b9: u8, b10: u8) -> [u8; 10] {
    [pdu_type, 0, 0, 0, 0, 4, 0, b8, b9, b10]
}

fn write_pdu_header(buf: &mut Vec<u8>, pdu_type: u8, length: usize) -> Result<()> {
    ensure!(
        length <= MAXIMUM_PDU_SIZE as usize,
        PduTooLargeSnafu { length }
    );
    // 1 - PDU-type, 2 - Reserved
    buf.push(pdu_type);
    buf.push(0);
    // 3-6 - PDU-length
    buf.write_u32::<BigEndian>(length as u32)
        .context(WriteFieldSnafu {
            field: "PDU-length",
        })
}

fn write_pdata(buf: &mut Vec<u8>, values: &[PDataValue]) -> Result<()> {
    let length = values
        .iter()
        .map(|pdv| PDV_HEADER_SIZE as usize + pdv.data.len())
        .sum();
    write_pdu_header(buf, pdu_type::P_DATA_TF, length)?;
    for pdv in values {
        buf.write_u32::<BigEndian>(pdv.data.len() as u32 + 2)
            .context(WriteFieldSnafu {
                field: "Item-length",
            })?;
        buf.push(pdv.presentation_context_id);
        buf.push(pdv.message_control());
        buf.extend_from_slice(&pdv.data);
    }
    Ok(())
}

/// Write an A-ASSOCIATE-RQ (`request`) or A-ASSOCIATE-AC PDU.
fn write_negotiation(
    buf: &mut Vec<u8>,
    negotiation: &Negotiation,
    request: bool,
) -> Result<()> {
    ensure!(
        !request || negotiation.user_identity_ac.is_none(),
        UserIdentityAcInRequestSnafu
    );
    let length = negotiation.length();
    let start = buf.len();
    buf.reserve(PDU_HEADER_SIZE as usize + length);

    let pdu_type = if request {
        pdu_type::A_ASSOCIATE_RQ
    } else {
        pdu_type::A_ASSOCIATE_AC
    };
    write_pdu_header(buf, pdu_type, length)?;

    // 7-8 - Protocol-version
    buf.write_u16::<BigEndian>(negotiation.protocol_version)
        .context(WriteFieldSnafu {
            field: "Protocol-version",
        })?;
    // 9-10 - Reserved
    buf.extend_from_slice(&[0, 0]);

    // 11-26 - Called-AE-title
    write_ae_title(buf, "Called-AE-title", &negotiation.called_ae_title)?;
    // 27-42 - Calling-AE-title
    write_ae_title(buf, "Calling-AE-title", &negotiation.calling_ae_title)?;
    // 43-74 - Reserved
    buf.extend_from_slice(&negotiation.reserved);

    // 75-xxx - Variable items
    write_string_item(
        buf,
        item_type::APPLICATION_CONTEXT,
        "Application-context-name",
        &negotiation.application_context_name,
    )?;

    let pc_type = if request {
        item_type::PRESENTATION_CONTEXT_RQ
    } else {
        item_type::PRESENTATION_CONTEXT_AC
    };
    for pc in &negotiation.presentation_contexts {
        write_item_header(buf, pc_type, pc.length())?;
        // 5 - Presentation-context-ID, 6 - Reserved,
        // 7 - Result/Reason (reserved in a request), 8 - Reserved
        let result = if request { 0 } else { pc.reason as u8 };
        buf.extend_from_slice(&[pc.id, 0, result, 0]);
        if let Some(abstract_syntax) = &pc.abstract_syntax {
            write_string_item(
                buf,
                item_type::ABSTRACT_SYNTAX,
                "Abstract-syntax-name",
                abstract_syntax,
            )?;
        }
        for transfer_syntax in &pc.transfer_syntaxes {
            write_string_item(
                buf,
                item_type::TRANSFER_SYNTAX,
                "Transfer-syntax-name",
                transfer_syntax,
            )?;
        }
    }

    write_user_information(buf, negotiation)?;

    debug_assert_eq!(buf.len() - start, PDU_HEADER_SIZE as usize + length);
    Ok(())
}

fn write_user_information(buf: &mut Vec<u8>, negotiation: &Negotiation) -> Result<()> {
    write_item_header(
        buf,
        item_type::USER_INFORMATION,
        negotiation.user_info_length(),
    )?;

    // Maximum Length Sub-Item
    write_item_header(buf, item_type::MAX_PDU_LENGTH, 4)?;
    buf.write_u32::<BigEndian>(negotiation.max_pdu_length)
        .context(WriteFieldSnafu {
            field: "Maximum-length-received",
        })?;

    write_string_item(
        buf,
        item_type::IMPLEMENTATION_CLASS_UID,
        "Implementation-class-uid",
        &negotiation.implementation_class_uid,
    )?;

    // synchronous mode is implied by the absence of this sub-item
    if negotiation.is_async_ops() {
        write_item_header(buf, item_type::ASYNC_OPS_WINDOW, 4)?;
        buf.write_u16::<BigEndian>(negotiation.max_ops_invoked)
            .context(WriteFieldSnafu {
                field: "Maximum-number-operations-invoked",
            })?;
        buf.write_u16::<BigEndian>(negotiation.max_ops_performed)
            .context(WriteFieldSnafu {
                field: "Maximum-number-operations-performed",
            })?;
    }

    for role in negotiation.role_selections.values() {
        write_item_header(buf, item_type::ROLE_SELECTION, role.length())?;
        write_u16_prefixed(buf, "SOP-class-uid", role.sop_class_uid.as_bytes())?;
        buf.push(role.scu_role as u8);
        buf.push(role.scp_role as u8);
    }

    if let Some(name) = &negotiation.implementation_version_name {
        write_string_item(
            buf,
            item_type::IMPLEMENTATION_VERSION_NAME,
            "Implementation-version-name",
            name,
        )?;
    }

    for (sop_class_uid, info) in &negotiation.extended_negotiations {
        write_item_header(
            buf,
            item_type::SOP_CLASS_EXTENDED_NEGOTIATION,
            2 + sop_class_uid.len() + info.len(),
        )?;
        write_u16_prefixed(buf, "SOP-class-uid", sop_class_uid.as_bytes())?;
        buf.extend_from_slice(info);
    }

    for cen in negotiation.common_extended_negotiations.values() {
        write_item_header(
            buf,
            item_type::SOP_CLASS_COMMON_EXTENDED_NEGOTIATION,
            cen.length(),
        )?;
        write_u16_prefixed(buf, "SOP-class-uid", cen.sop_class_uid.as_bytes())?;
        write_u16_prefixed(buf, "Service-class-uid", cen.service_class_uid.as_bytes())?;
        let related_length = cen.related_length();
        ensure!(
            related_length <= u16::MAX as usize,
            FieldTooLongSnafu {
                field: "Related-general-sop-class-identification",
                length: related_length
            }
        );
        buf.write_u16::<BigEndian>(related_length as u16)
            .context(WriteFieldSnafu {
                field: "Related-general-sop-class-identification-length",
            })?;
        for uid in &cen.related_general_sop_class_uids {
            write_u16_prefixed(buf, "Related-general-sop-class-uid", uid.as_bytes())?;
        }
    }

    if let Some(identity) = &negotiation.user_identity {
        write_item_header(buf, item_type::USER_IDENTITY_RQ, identity.length())?;
        buf.push(identity.identity_type.code());
        buf.push(identity.positive_response_requested as u8);
        write_u16_prefixed(buf, "Primary-field", &identity.primary_field)?;
        write_u16_prefixed(buf, "Secondary-field", &identity.secondary_field)?;
    }

    if let Some(identity_ac) = &negotiation.user_identity_ac {
        write_item_header(buf, item_type::USER_IDENTITY_AC, identity_ac.length())?;
        write_u16_prefixed(buf, "Server-response", &identity_ac.server_response)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    fn read_u16(bytes: &[u8], at: usize) -> usize {
        u16::from_be_bytes([bytes[at], bytes[at + 1]]) as usize
    }

    #[test]
    fn fixed_pdus() {
        let mut out = Vec::new();
        write_pdu(&mut out, &Pdu::ReleaseRQ).unwrap();
        assert_eq!(out, [0x05, 0, 0, 0, 0, 4, 0, 0, 0, 0]);

        let mut out = Vec::new();
        write_pdu(
            &mut out,
            &Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnrecognizedPdu,
                ),
            },
        )
        .unwrap();
        assert_eq!(out, [0x07, 0, 0, 0, 0, 4, 0, 0, 2, 1]);

        let mut out = Vec::new();
        write_pdu(
            &mut out,
            &Pdu::AssociationRJ(AssociationRJ {
                result: AssociationRJResult::Transient,
                source: AssociationRJSource::ServiceProviderPresentation(
                    AssociationRJServiceProviderPresentationReason::TemporaryCongestion,
                ),
            }),
        )
        .unwrap();
        assert_eq!(out, [0x03, 0, 0, 0, 0, 4, 0, 2, 3, 1]);
    }

    #[test]
    fn item_lengths_match_content() {
        let mut rq = Negotiation::new("STORESCU", "STORESCP");
        rq.add_presentation_context_for("1.2.840.10008.5.1.4.1.1.7", "1.2.840.10008.1.2.1");
        rq.add_presentation_context(PresentationContext::proposed(
            3,
            "1.2.840.10008.1.1",
            ["1.2.840.10008.1.2", "1.2.840.10008.1.2.1"],
        ));

        let mut out = Vec::new();
        write_pdu(&mut out, &Pdu::AssociationRQ(rq.clone())).unwrap();
        let pdu_length = u32::from_be_bytes([out[2], out[3], out[4], out[5]]) as usize;
        assert_eq!(pdu_length, out.len() - 6);
        assert_eq!(pdu_length, rq.length());

        // walk the variable items, checking each length against the next item
        let mut pos = 6 + 68;
        let mut item_types = vec![];
        while pos < out.len() {
            item_types.push(out[pos]);
            let len = read_u16(&out, pos + 2);
            if out[pos] == item_type::PRESENTATION_CONTEXT_RQ {
                // sub-items must exactly fill the item
                let end = pos + 4 + len;
                let mut sub = pos + 8;
                while sub < end {
                    sub += 4 + read_u16(&out, sub + 2);
                }
                assert_eq!(sub, end);
            }
            if out[pos] == item_type::USER_INFORMATION {
                assert_eq!(len, rq.user_info_length());
            }
            pos += 4 + len;
        }
        assert_eq!(pos, out.len());
        assert_eq!(item_types, vec![0x10, 0x20, 0x20, 0x50]);
    }

    #[test]
    fn request_with_user_identity_response_is_refused() {
        let mut rq = Negotiation::new("A", "B");
        rq.user_identity_ac = Some(UserIdentityAC::new(b"ticket".to_vec()));
        let mut out = Vec::new();
        let err = write_pdu(&mut out, &Pdu::AssociationRQ(rq.clone())).unwrap_err();
        assert_matches!(err, Error::UserIdentityAcInRequest { .. });
        assert!(out.is_empty());

        // fine in an acceptance
        write_pdu(&mut out, &Pdu::AssociationAC(rq)).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn long_ae_title_is_refused() {
        let rq = Negotiation::new("A-CALLING-AE-TITLE", "B");
        let mut out = Vec::new();
        let err = write_pdu(&mut out, &Pdu::AssociationRQ(rq)).unwrap_err();
        assert_matches!(err, Error::AeTitleTooLong { .. });
        assert!(out.is_empty());
    }
}
