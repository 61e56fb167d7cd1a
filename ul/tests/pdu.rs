use dicom_ul_codec::pdu::reader::{read_pdu, Error as ReadError};
use dicom_ul_codec::pdu::writer::write_pdu;
use dicom_ul_codec::pdu::{
    AbortRQServiceProviderReason, AbortRQSource, AssociationRJ, AssociationRJResult,
    AssociationRJServiceUserReason, AssociationRJSource, CommonExtendedNegotiation,
    Negotiation, PDataValue, PDataValueType, Pdu, PresentationContext,
    PresentationContextResultReason, RoleSelection, UserIdentity, UserIdentityAC,
    UserIdentityType,
    DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE,
};
use matches::assert_matches;
use rstest::rstest;

const VERIFICATION: &str = "1.2.840.10008.1.1";
const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

fn roundtrip(pdu: &Pdu) -> Pdu {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, pdu).unwrap();
    let pdu_length = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    assert_eq!(pdu_length + 6, bytes.len());
    read_pdu(&mut bytes.as_slice(), MAXIMUM_PDU_SIZE, true).unwrap()
}

fn request(contexts: usize, roles: usize, related: usize) -> Negotiation {
    let mut rq = Negotiation::new("STORESCU", "STORESCP");
    for i in 0..contexts {
        let abstract_syntax = format!("{}.{}", CT_IMAGE_STORAGE, i);
        assert!(rq.add_presentation_context_for(abstract_syntax, EXPLICIT_VR_LE));
    }
    for i in 0..roles {
        rq.add_role_selection(RoleSelection::new(
            format!("{}.{}", CT_IMAGE_STORAGE, i),
            true,
            i % 2 == 0,
        ));
    }
    rq.add_common_extended_negotiation(CommonExtendedNegotiation::new(
        CT_IMAGE_STORAGE,
        "1.2.840.10008.4.2",
        (0..related).map(|i| format!("1.2.840.10008.5.1.4.1.1.2.{}", i + 1)),
    ));
    rq.add_extended_negotiation(CT_IMAGE_STORAGE, vec![1, 0, 1]);
    rq.user_identity = Some(UserIdentity::username_password("admin", "secret"));
    rq
}

#[rstest]
fn association_rq_roundtrip(
    #[values(1, 3, 128)] contexts: usize,
    #[values(0, 2)] roles: usize,
    #[values(0, 1, 4)] related: usize,
) {
    let rq = request(contexts, roles, related);
    let pdu = Pdu::AssociationRQ(rq.clone());
    assert_eq!(roundtrip(&pdu), pdu);

    let ids: Vec<u8> = rq.presentation_contexts.iter().map(|pc| pc.id).collect();
    let expected: Vec<u8> = (0..contexts).map(|i| (i * 2 + 1) as u8).collect();
    assert_eq!(ids, expected);
}

#[test]
fn association_ac_roundtrip() {
    let mut ac = Negotiation::new("STORESCU", "STORESCP");
    ac.max_pdu_length = 32_768;
    ac.max_ops_invoked = 0;
    ac.max_ops_performed = 4;
    ac.add_presentation_context(PresentationContext::accepted(1, EXPLICIT_VR_LE));
    ac.add_presentation_context(PresentationContext::rejected(
        3,
        PresentationContextResultReason::AbstractSyntaxNotSupported,
    ));
    ac.add_role_selection(RoleSelection::new(CT_IMAGE_STORAGE, false, true));
    ac.user_identity_ac = Some(UserIdentityAC::new(b"token".to_vec()));
    ac.implementation_version_name = None;

    let pdu = Pdu::AssociationAC(ac);
    let read = roundtrip(&pdu);
    assert_eq!(read, pdu);

    let Pdu::AssociationAC(ac) = read else {
        panic!("expected A-ASSOCIATE-AC, got {:?}", read);
    };
    assert!(ac.is_async_ops());
    assert!(ac.presentation_context(1).unwrap().is_accepted());
    assert!(!ac.presentation_context(3).unwrap().is_accepted());
}

#[test]
fn ae_titles_are_padded_and_trimmed() {
    let rq = Negotiation::new("CALLING", "CALLED");
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::AssociationRQ(rq)).unwrap();

    // called AE title first, padded with spaces to 16 bytes
    assert_eq!(&bytes[10..26], b"CALLED          ");
    assert_eq!(&bytes[26..42], b"CALLING         ");

    let Pdu::AssociationRQ(read) = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, true).unwrap()
    else {
        panic!("expected A-ASSOCIATE-RQ");
    };
    assert_eq!(read.called_ae_title, "CALLED");
    assert_eq!(read.calling_ae_title, "CALLING");
}

#[test]
fn unknown_items_are_skipped() {
    let mut rq = Negotiation::new("A", "B");
    rq.add_presentation_context_for(VERIFICATION, IMPLICIT_VR_LE);
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::AssociationRQ(rq.clone())).unwrap();

    // append an item of an unknown type, fixing up the PDU length
    bytes.extend_from_slice(&[0x7F, 0, 0, 2, 0xAB, 0xCD]);
    let pdu_length = (bytes.len() - 6) as u32;
    bytes[2..6].copy_from_slice(&pdu_length.to_be_bytes());

    let read = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, true).unwrap();
    assert_eq!(read, Pdu::AssociationRQ(rq));
}

#[test]
fn pdata_roundtrip() {
    let pdu = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![0x11; 80],
            },
            PDataValue {
                presentation_context_id: 1,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![0x22; 4_000],
            },
        ],
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn control_pdus_roundtrip() {
    let pdus = [
        Pdu::ReleaseRQ,
        Pdu::ReleaseRP,
        Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser(0),
        },
        Pdu::AbortRQ {
            source: AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::Reserved(3)),
        },
        Pdu::AssociationRJ(AssociationRJ {
            result: AssociationRJResult::Permanent,
            source: AssociationRJSource::ServiceUser(
                AssociationRJServiceUserReason::CallingAETitleNotRecognized,
            ),
        }),
        Pdu::AssociationRJ(AssociationRJ {
            result: AssociationRJResult::Transient,
            source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::Reserved(9)),
        }),
    ];
    for pdu in &pdus {
        assert_eq!(&roundtrip(pdu), pdu);
    }
}

#[test]
fn pdu_bounds_are_checked_before_the_body() {
    // P-DATA-TF announcing one byte more than the absolute maximum
    let bytes = [0x04, 0, 0x01, 0, 0, 0x01];
    let err = read_pdu(&mut &bytes[..], MAXIMUM_PDU_SIZE, false).unwrap_err();
    assert_matches!(err, ReadError::PduTooLarge { .. });

    // PDV item length of 1 cannot hold its own header
    let bytes = [0x04, 0, 0, 0, 0, 6, 0, 0, 0, 1, 1, 3];
    let err = read_pdu(&mut &bytes[..], DEFAULT_MAX_PDU, true).unwrap_err();
    assert_matches!(err, ReadError::InvalidPdvLength { length: 1, .. });
    assert_eq!(
        err.abort_reason(),
        Some(AbortRQServiceProviderReason::InvalidPduParameter)
    );
}

#[test]
fn lenient_reading_accepts_oversized_pdus() {
    let pdu = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Data,
            is_last: true,
            data: vec![0; DEFAULT_MAX_PDU as usize],
        }],
    };
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu).unwrap();

    let err = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, true).unwrap_err();
    assert_matches!(err, ReadError::PduTooLarge { .. });
    let read = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, false).unwrap();
    assert_eq!(read, pdu);
}

#[test]
fn common_extended_negotiation_block_mismatch_is_refused() {
    let mut rq = Negotiation::new("A", "B");
    rq.add_common_extended_negotiation(CommonExtendedNegotiation::new(
        CT_IMAGE_STORAGE,
        "1.2.840.10008.4.2",
        ["1.2.3"],
    ));
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::AssociationRQ(rq)).unwrap();

    // the related block length is followed by the only related UID entry
    let uid_entry = [0u8, 5, b'1', b'.', b'2', b'.', b'3'];
    let at = bytes
        .windows(uid_entry.len())
        .position(|w| w == uid_entry)
        .unwrap();
    assert_eq!(&bytes[at - 2..at], &[0, 7]);
    // declare a related block shorter than its UID entry
    bytes[at - 1] = 6;

    let err = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, true).unwrap_err();
    assert_matches!(err, ReadError::InvalidCommonExtendedNegotiation { .. });
}

#[test]
fn duplicate_presentation_context_ids_are_refused() {
    let mut rq = Negotiation::new("A", "B");
    rq.presentation_contexts = vec![
        PresentationContext::proposed(1, VERIFICATION, [IMPLICIT_VR_LE]),
        PresentationContext::proposed(1, CT_IMAGE_STORAGE, [IMPLICIT_VR_LE]),
    ];
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::AssociationRQ(rq)).unwrap();
    let err = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, true).unwrap_err();
    assert_matches!(err, ReadError::DuplicatePresentationContextId { id: 1, .. });
}

#[test]
fn unknown_user_identity_type_is_kept() {
    let mut rq = Negotiation::new("A", "B");
    rq.add_presentation_context_for(VERIFICATION, IMPLICIT_VR_LE);
    rq.user_identity = Some(UserIdentity::new(
        true,
        UserIdentityType::Other(0x2A),
        b"opaque".to_vec(),
        b"blob".to_vec(),
    ));
    let pdu = Pdu::AssociationRQ(rq);
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn user_identity_response_in_request_is_refused() {
    let mut ac = Negotiation::new("A", "B");
    ac.user_identity_ac = Some(UserIdentityAC::new(b"token".to_vec()));
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &Pdu::AssociationAC(ac)).unwrap();

    // same body, announced as an A-ASSOCIATE-RQ
    bytes[0] = 0x01;
    let err = read_pdu(&mut bytes.as_slice(), DEFAULT_MAX_PDU, true).unwrap_err();
    assert_matches!(err, ReadError::UserIdentityAcInRequest { .. });
    assert_eq!(
        err.abort_reason(),
        Some(AbortRQServiceProviderReason::InvalidPduParameter)
    );
}
