//! Protocol Data Unit module
//!
//! This module comprises the data structures exchanged
//! over the DICOM Upper Layer protocol during association negotiation
//! (request, acceptance, rejection, release and abort),
//! the presentation data values carried by P-DATA-TF PDUs,
//! as well as readers and writers of whole PDUs.
//!
//! Association request and acceptance share a single representation,
//! [`Negotiation`], which is wrapped by either
//! [`Pdu::AssociationRQ`] or [`Pdu::AssociationAC`].
#[cfg(feature = "async")]
pub mod nonblocking;
pub mod reader;
pub mod wire;
pub mod writer;

use std::collections::BTreeMap;
use std::fmt::Display;

pub use reader::read_pdu;
pub use writer::write_pdu;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The largest PDU length accepted by this implementation (16 MiB),
/// regardless of what was negotiated.
pub const MAXIMUM_PDU_SIZE: u32 = 0x0100_0000;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

/// The length of a PDV header in bytes,
/// comprising the item length (4 bytes),
/// presentation context ID (1 byte)
/// and message control header (1 byte).
pub const PDV_HEADER_SIZE: u32 = 6;

/// The DICOM application context name.
pub const DICOM_APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// PDU type codes.
pub mod pdu_type {
    pub const A_ASSOCIATE_RQ: u8 = 0x01;
    pub const A_ASSOCIATE_AC: u8 = 0x02;
    pub const A_ASSOCIATE_RJ: u8 = 0x03;
    pub const P_DATA_TF: u8 = 0x04;
    pub const A_RELEASE_RQ: u8 = 0x05;
    pub const A_RELEASE_RP: u8 = 0x06;
    pub const A_ABORT: u8 = 0x07;
}

/// Item and sub-item type codes
/// found in association request and acceptance PDUs.
pub mod item_type {
    pub const APPLICATION_CONTEXT: u8 = 0x10;
    pub const PRESENTATION_CONTEXT_RQ: u8 = 0x20;
    pub const PRESENTATION_CONTEXT_AC: u8 = 0x21;
    pub const ABSTRACT_SYNTAX: u8 = 0x30;
    pub const TRANSFER_SYNTAX: u8 = 0x40;
    pub const USER_INFORMATION: u8 = 0x50;
    pub const MAX_PDU_LENGTH: u8 = 0x51;
    pub const IMPLEMENTATION_CLASS_UID: u8 = 0x52;
    pub const ASYNC_OPS_WINDOW: u8 = 0x53;
    pub const ROLE_SELECTION: u8 = 0x54;
    pub const IMPLEMENTATION_VERSION_NAME: u8 = 0x55;
    pub const SOP_CLASS_EXTENDED_NEGOTIATION: u8 = 0x56;
    pub const SOP_CLASS_COMMON_EXTENDED_NEGOTIATION: u8 = 0x57;
    pub const USER_IDENTITY_RQ: u8 = 0x58;
    pub const USER_IDENTITY_AC: u8 = 0x59;
}

/// Message control header bits of a presentation data value.
pub mod message_control {
    /// The fragment contains command information
    pub const COMMAND: u8 = 0x01;
    /// The fragment contains data set information
    pub const DATA: u8 = 0x00;
    /// The fragment is the last one of its command or data set
    pub const LAST: u8 = 0x02;
    /// More fragments of the same command or data set follow
    pub const PENDING: u8 = 0x00;
}

/// A presentation context, as proposed by the requestor
/// or as answered by the acceptor.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContext {
    /// the presentation context identifier (odd, 1 to 255)
    pub id: u8,
    /// the outcome of the negotiation,
    /// only significant in an association acceptance
    pub reason: PresentationContextResultReason,
    /// the abstract syntax UID,
    /// only present in an association request
    pub abstract_syntax: Option<String>,
    /// the transfer syntaxes proposed,
    /// or the single transfer syntax accepted
    pub transfer_syntaxes: Vec<String>,
}

impl PresentationContext {
    /// Create a proposed presentation context for an association request.
    pub fn proposed<A, I, T>(id: u8, abstract_syntax: A, transfer_syntaxes: I) -> Self
    where
        A: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        PresentationContext {
            id,
            reason: PresentationContextResultReason::Acceptance,
            abstract_syntax: Some(abstract_syntax.into()),
            transfer_syntaxes: transfer_syntaxes.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an accepted presentation context for an association acceptance.
    pub fn accepted(id: u8, transfer_syntax: impl Into<String>) -> Self {
        PresentationContext {
            id,
            reason: PresentationContextResultReason::Acceptance,
            abstract_syntax: None,
            transfer_syntaxes: vec![transfer_syntax.into()],
        }
    }

    /// Create a rejected presentation context for an association acceptance.
    ///
    /// The transfer syntax field is not significant in this case,
    /// but it is still sent.
    pub fn rejected(id: u8, reason: PresentationContextResultReason) -> Self {
        PresentationContext {
            id,
            reason,
            abstract_syntax: None,
            transfer_syntaxes: vec![String::new()],
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.reason == PresentationContextResultReason::Acceptance
    }

    /// The first transfer syntax, which is the accepted one
    /// in an association acceptance.
    pub fn transfer_syntax(&self) -> Option<&str> {
        self.transfer_syntaxes.first().map(String::as_str)
    }

    /// The length of the presentation context item content,
    /// excluding its own 4-byte item header.
    pub fn length(&self) -> usize {
        4 + self
            .abstract_syntax
            .as_ref()
            .map(|uid| 4 + uid.len())
            .unwrap_or(0)
            + self
                .transfer_syntaxes
                .iter()
                .map(|uid| 4 + uid.len())
                .sum::<usize>()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    pub(crate) fn from(reason: u8) -> Option<PresentationContextResultReason> {
        use PresentationContextResultReason::*;
        Some(match reason {
            0 => Acceptance,
            1 => UserRejection,
            2 => NoReason,
            3 => AbstractSyntaxNotSupported,
            4 => TransferSyntaxesNotSupported,
            _ => return None,
        })
    }
}

impl Display for PresentationContextResultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            PresentationContextResultReason::Acceptance => "acceptance",
            PresentationContextResultReason::UserRejection => "user rejection",
            PresentationContextResultReason::NoReason => "no reason",
            PresentationContextResultReason::AbstractSyntaxNotSupported => {
                "abstract syntax not supported"
            }
            PresentationContextResultReason::TransferSyntaxesNotSupported => {
                "transfer syntaxes not supported"
            }
        };
        f.write_str(msg)
    }
}

/// SCU/SCP role selection for one SOP class.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct RoleSelection {
    pub sop_class_uid: String,
    pub scu_role: bool,
    pub scp_role: bool,
}

impl RoleSelection {
    pub fn new(sop_class_uid: impl Into<String>, scu_role: bool, scp_role: bool) -> Self {
        RoleSelection {
            sop_class_uid: sop_class_uid.into(),
            scu_role,
            scp_role,
        }
    }

    pub(crate) fn length(&self) -> usize {
        2 + self.sop_class_uid.len() + 2
    }
}

/// SOP class common extended negotiation sub-item.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommonExtendedNegotiation {
    pub sop_class_uid: String,
    pub service_class_uid: String,
    pub related_general_sop_class_uids: Vec<String>,
}

impl CommonExtendedNegotiation {
    pub fn new<I, T>(
        sop_class_uid: impl Into<String>,
        service_class_uid: impl Into<String>,
        related_general_sop_class_uids: I,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        CommonExtendedNegotiation {
            sop_class_uid: sop_class_uid.into(),
            service_class_uid: service_class_uid.into(),
            related_general_sop_class_uids: related_general_sop_class_uids
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }

    /// The byte length of the related general SOP class identification block.
    pub(crate) fn related_length(&self) -> usize {
        self.related_general_sop_class_uids
            .iter()
            .map(|uid| 2 + uid.len())
            .sum()
    }

    pub(crate) fn length(&self) -> usize {
        2 + self.sop_class_uid.len() + 2 + self.service_class_uid.len() + 2 + self.related_length()
    }
}

/// User identity negotiation, as requested by the association requestor.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UserIdentity {
    pub positive_response_requested: bool,
    pub identity_type: UserIdentityType,
    pub primary_field: Vec<u8>,
    pub secondary_field: Vec<u8>,
}

impl UserIdentity {
    pub fn new(
        positive_response_requested: bool,
        identity_type: UserIdentityType,
        primary_field: Vec<u8>,
        secondary_field: Vec<u8>,
    ) -> Self {
        UserIdentity {
            positive_response_requested,
            identity_type,
            primary_field,
            secondary_field,
        }
    }

    /// Username only identity
    pub fn username(username: impl Into<Vec<u8>>) -> Self {
        Self::new(false, UserIdentityType::Username, username.into(), Vec::new())
    }

    /// Username and passcode identity
    pub fn username_password(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        Self::new(
            false,
            UserIdentityType::UsernamePassword,
            username.into(),
            password.into(),
        )
    }

    pub(crate) fn length(&self) -> usize {
        1 + 1 + 2 + self.primary_field.len() + 2 + self.secondary_field.len()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
#[non_exhaustive]
pub enum UserIdentityType {
    Username,
    UsernamePassword,
    KerberosServiceTicket,
    SamlAssertion,
    Jwt,
    /// an identity type this implementation does not know of
    Other(u8),
}

impl UserIdentityType {
    pub(crate) fn from(user_identity_type: u8) -> Self {
        match user_identity_type {
            1 => Self::Username,
            2 => Self::UsernamePassword,
            3 => Self::KerberosServiceTicket,
            4 => Self::SamlAssertion,
            5 => Self::Jwt,
            code => Self::Other(code),
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Username => 1,
            Self::UsernamePassword => 2,
            Self::KerberosServiceTicket => 3,
            Self::SamlAssertion => 4,
            Self::Jwt => 5,
            Self::Other(code) => code,
        }
    }
}

impl Display for UserIdentityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            UserIdentityType::Username => "username",
            UserIdentityType::UsernamePassword => "username and passcode",
            UserIdentityType::KerberosServiceTicket => "Kerberos service ticket",
            UserIdentityType::SamlAssertion => "SAML assertion",
            UserIdentityType::Jwt => "JSON web token",
            UserIdentityType::Other(code) => return write!(f, "user identity type {}", code),
        };
        f.write_str(msg)
    }
}

/// User identity server response, sent by the association acceptor.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct UserIdentityAC {
    pub server_response: Vec<u8>,
}

impl UserIdentityAC {
    pub fn new(server_response: Vec<u8>) -> Self {
        UserIdentityAC { server_response }
    }

    pub(crate) fn length(&self) -> usize {
        2 + self.server_response.len()
    }
}

/// The parameters exchanged in an association request or acceptance.
///
/// The same structure is used in both directions:
/// whether it is a request or an acceptance
/// is decided by the PDU variant which contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub protocol_version: u16,
    pub called_ae_title: String,
    pub calling_ae_title: String,
    /// bytes 43-74 of the PDU,
    /// which an acceptor echoes back from the request
    pub reserved: [u8; 32],
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContext>,
    pub max_pdu_length: u32,
    pub max_ops_invoked: u16,
    pub max_ops_performed: u16,
    pub implementation_class_uid: String,
    pub implementation_version_name: Option<String>,
    pub role_selections: BTreeMap<String, RoleSelection>,
    pub extended_negotiations: BTreeMap<String, Vec<u8>>,
    pub common_extended_negotiations: BTreeMap<String, CommonExtendedNegotiation>,
    pub user_identity: Option<UserIdentity>,
    pub user_identity_ac: Option<UserIdentityAC>,
}

impl Default for Negotiation {
    fn default() -> Self {
        Negotiation {
            protocol_version: 1,
            called_ae_title: String::new(),
            calling_ae_title: String::new(),
            reserved: [0; 32],
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: Vec::new(),
            max_pdu_length: DEFAULT_MAX_PDU,
            max_ops_invoked: 1,
            max_ops_performed: 1,
            implementation_class_uid: crate::IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_version_name: Some(crate::IMPLEMENTATION_VERSION_NAME.to_string()),
            role_selections: BTreeMap::new(),
            extended_negotiations: BTreeMap::new(),
            common_extended_negotiations: BTreeMap::new(),
            user_identity: None,
            user_identity_ac: None,
        }
    }
}

impl Negotiation {
    /// Create negotiation parameters between two application entities,
    /// with this implementation's defaults for everything else.
    pub fn new(calling_ae_title: impl Into<String>, called_ae_title: impl Into<String>) -> Self {
        Negotiation {
            calling_ae_title: calling_ae_title.into(),
            called_ae_title: called_ae_title.into(),
            ..Default::default()
        }
    }

    /// Whether asynchronous operations were negotiated
    /// (either window side other than 1).
    pub fn is_async_ops(&self) -> bool {
        self.max_ops_invoked != 1 || self.max_ops_performed != 1
    }

    /// Look up a presentation context by its identifier.
    pub fn presentation_context(&self, id: u8) -> Option<&PresentationContext> {
        self.presentation_contexts.iter().find(|pc| pc.id == id)
    }

    /// Add a presentation context,
    /// unless one with the same identifier is already present.
    ///
    /// Returns whether the context was added.
    pub fn add_presentation_context(&mut self, pc: PresentationContext) -> bool {
        if self.presentation_context(pc.id).is_some() {
            return false;
        }
        self.presentation_contexts.push(pc);
        true
    }

    /// Propose a presentation context for the given
    /// abstract syntax and a single transfer syntax,
    /// assigning the next odd presentation context identifier.
    ///
    /// Returns `false` and leaves the negotiation untouched
    /// if the same pair was already proposed,
    /// or if no identifier is left.
    pub fn add_presentation_context_for(
        &mut self,
        abstract_syntax: impl Into<String>,
        transfer_syntax: impl Into<String>,
    ) -> bool {
        let abstract_syntax = abstract_syntax.into();
        let transfer_syntax = transfer_syntax.into();
        if self.contains_presentation_context_for(&abstract_syntax, Some(&transfer_syntax)) {
            return false;
        }
        let id = self.presentation_contexts.len() * 2 + 1;
        if id > 255 {
            return false;
        }
        self.add_presentation_context(PresentationContext::proposed(
            id as u8,
            abstract_syntax,
            [transfer_syntax],
        ))
    }

    /// Check whether a presentation context exists for the given abstract syntax,
    /// and optionally including the given transfer syntax.
    pub fn contains_presentation_context_for(
        &self,
        abstract_syntax: &str,
        transfer_syntax: Option<&str>,
    ) -> bool {
        self.presentation_contexts.iter().any(|pc| {
            pc.abstract_syntax.as_deref() == Some(abstract_syntax)
                && transfer_syntax
                    .map(|ts| pc.transfer_syntaxes.iter().any(|t| t == ts))
                    .unwrap_or(true)
        })
    }

    pub fn add_role_selection(&mut self, role_selection: RoleSelection) {
        self.role_selections
            .insert(role_selection.sop_class_uid.clone(), role_selection);
    }

    pub fn role_selection(&self, sop_class_uid: &str) -> Option<&RoleSelection> {
        self.role_selections.get(sop_class_uid)
    }

    pub fn add_extended_negotiation(&mut self, sop_class_uid: impl Into<String>, info: Vec<u8>) {
        self.extended_negotiations.insert(sop_class_uid.into(), info);
    }

    pub fn extended_negotiation(&self, sop_class_uid: &str) -> Option<&[u8]> {
        self.extended_negotiations
            .get(sop_class_uid)
            .map(Vec::as_slice)
    }

    pub fn add_common_extended_negotiation(&mut self, negotiation: CommonExtendedNegotiation) {
        self.common_extended_negotiations
            .insert(negotiation.sop_class_uid.clone(), negotiation);
    }

    pub fn common_extended_negotiation(
        &self,
        sop_class_uid: &str,
    ) -> Option<&CommonExtendedNegotiation> {
        self.common_extended_negotiations.get(sop_class_uid)
    }

    /// The exact length of the association PDU body
    /// (everything after the 6-byte PDU header).
    pub fn length(&self) -> usize {
        // protocol version, reserved, called and calling AE titles, reserved
        68 + 4
            + self.application_context_name.len()
            + self
                .presentation_contexts
                .iter()
                .map(|pc| 4 + pc.length())
                .sum::<usize>()
            + 4
            + self.user_info_length()
    }

    /// The exact length of the user information item content.
    pub fn user_info_length(&self) -> usize {
        let mut len = 8 + 4 + self.implementation_class_uid.len();
        if self.is_async_ops() {
            len += 8;
        }
        len += self
            .role_selections
            .values()
            .map(|rs| 4 + rs.length())
            .sum::<usize>();
        if let Some(name) = &self.implementation_version_name {
            len += 4 + name.len();
        }
        len += self
            .extended_negotiations
            .iter()
            .map(|(uid, info)| 4 + 2 + uid.len() + info.len())
            .sum::<usize>();
        len += self
            .common_extended_negotiations
            .values()
            .map(|cen| 4 + cen.length())
            .sum::<usize>();
        if let Some(identity) = &self.user_identity {
            len += 4 + identity.length();
        }
        if let Some(identity_ac) = &self.user_identity_ac {
            len += 4 + identity_ac.length();
        }
        len
    }
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJResult {
    Permanent = 1,
    Transient = 2,
}

impl AssociationRJResult {
    pub(crate) fn from(value: u8) -> Option<AssociationRJResult> {
        match value {
            1 => Some(AssociationRJResult::Permanent),
            2 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }
}

impl Display for AssociationRJResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJResult::Permanent => f.write_str("rejected permanent"),
            AssociationRJResult::Transient => f.write_str("rejected transient"),
        }
    }
}

/// The source of an association rejection,
/// with the reason relative to that source.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJSource {
    ServiceUser(AssociationRJServiceUserReason),
    ServiceProviderASCE(AssociationRJServiceProviderASCEReason),
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    /// Interpret a source code and its reason code.
    /// Unassigned reasons are kept as reserved codes.
    pub(crate) fn from(source: u8, reason: u8) -> Option<AssociationRJSource> {
        use AssociationRJServiceProviderASCEReason as Acse;
        use AssociationRJServiceProviderPresentationReason as Presentation;
        use AssociationRJServiceUserReason as User;
        Some(match source {
            1 => AssociationRJSource::ServiceUser(match reason {
                1 => User::NoReasonGiven,
                2 => User::ApplicationContextNameNotSupported,
                3 => User::CallingAETitleNotRecognized,
                7 => User::CalledAETitleNotRecognized,
                x => User::Reserved(x),
            }),
            2 => AssociationRJSource::ServiceProviderASCE(match reason {
                1 => Acse::NoReasonGiven,
                2 => Acse::ProtocolVersionNotSupported,
                x => Acse::Reserved(x),
            }),
            3 => AssociationRJSource::ServiceProviderPresentation(match reason {
                1 => Presentation::TemporaryCongestion,
                2 => Presentation::LocalLimitExceeded,
                x => Presentation::Reserved(x),
            }),
            _ => return None,
        })
    }

    /// The source and reason codes, as written to the wire.
    pub fn codes(&self) -> (u8, u8) {
        use AssociationRJServiceProviderASCEReason as Acse;
        use AssociationRJServiceProviderPresentationReason as Presentation;
        use AssociationRJServiceUserReason as User;
        match *self {
            AssociationRJSource::ServiceUser(reason) => (
                1,
                match reason {
                    User::NoReasonGiven => 1,
                    User::ApplicationContextNameNotSupported => 2,
                    User::CallingAETitleNotRecognized => 3,
                    User::CalledAETitleNotRecognized => 7,
                    User::Reserved(x) => x,
                },
            ),
            AssociationRJSource::ServiceProviderASCE(reason) => (
                2,
                match reason {
                    Acse::NoReasonGiven => 1,
                    Acse::ProtocolVersionNotSupported => 2,
                    Acse::Reserved(x) => x,
                },
            ),
            AssociationRJSource::ServiceProviderPresentation(reason) => (
                3,
                match reason {
                    Presentation::TemporaryCongestion => 1,
                    Presentation::LocalLimitExceeded => 2,
                    Presentation::Reserved(x) => x,
                },
            ),
        }
    }
}

impl Display for AssociationRJSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJSource::ServiceUser(r) => write!(f, "service user: {}", r),
            AssociationRJSource::ServiceProviderASCE(r) => {
                write!(f, "service provider (ACSE): {}", r)
            }
            AssociationRJSource::ServiceProviderPresentation(r) => {
                write!(f, "service provider (presentation): {}", r)
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAETitleNotRecognized,
    CalledAETitleNotRecognized,
    Reserved(u8),
}

impl Display for AssociationRJServiceUserReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceUserReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceUserReason::ApplicationContextNameNotSupported => {
                f.write_str("application context name not supported")
            }
            AssociationRJServiceUserReason::CallingAETitleNotRecognized => {
                f.write_str("calling AE title not recognized")
            }
            AssociationRJServiceUserReason::CalledAETitleNotRecognized => {
                f.write_str("called AE title not recognized")
            }
            AssociationRJServiceUserReason::Reserved(code) => write!(f, "reserved code {}", code),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderASCEReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
    Reserved(u8),
}

impl Display for AssociationRJServiceProviderASCEReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderASCEReason::NoReasonGiven => f.write_str("no reason given"),
            AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => {
                f.write_str("protocol version not supported")
            }
            AssociationRJServiceProviderASCEReason::Reserved(code) => {
                write!(f, "reserved code {}", code)
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl Display for AssociationRJServiceProviderPresentationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJServiceProviderPresentationReason::TemporaryCongestion => {
                f.write_str("temporary congestion")
            }
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => {
                f.write_str("local limit exceeded")
            }
            AssociationRJServiceProviderPresentationReason::Reserved(code) => {
                write!(f, "reserved code {}", code)
            }
        }
    }
}

/// An in-memory representation of an association rejection.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

impl Display for AssociationRJ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} by {}", self.result, self.source)
    }
}

impl From<AssociationRJ> for Pdu {
    fn from(value: AssociationRJ) -> Self {
        Pdu::AssociationRJ(value)
    }
}

/// A single presentation data value,
/// as found in a P-DATA-TF PDU.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

impl PDataValue {
    /// The message control header byte of this value.
    pub fn message_control(&self) -> u8 {
        let kind = match self.value_type {
            PDataValueType::Command => message_control::COMMAND,
            PDataValueType::Data => message_control::DATA,
        };
        let last = if self.is_last {
            message_control::LAST
        } else {
            message_control::PENDING
        };
        kind | last
    }
}

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PDataValueType {
    Command,
    Data,
}

impl PDataValueType {
    pub(crate) fn from_message_control(header: u8) -> Self {
        if header & message_control::COMMAND != 0 {
            PDataValueType::Command
        } else {
            PDataValueType::Data
        }
    }
}

/// The originator of an abort.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQSource {
    /// DICOM UL service-user initiated abort,
    /// with the reason field as received (not significant)
    ServiceUser(u8),
    /// DICOM UL service-provider initiated abort
    ServiceProvider(AbortRQServiceProviderReason),
    /// Reserved source code (1),
    /// with the reason field as received
    Reserved(u8),
}

impl AbortRQSource {
    pub(crate) fn from(source: u8, reason: u8) -> Option<AbortRQSource> {
        match source {
            0 => Some(AbortRQSource::ServiceUser(reason)),
            1 => Some(AbortRQSource::Reserved(reason)),
            2 => Some(AbortRQSource::ServiceProvider(
                AbortRQServiceProviderReason::from(reason),
            )),
            _ => None,
        }
    }

    /// The source and reason codes, as written to the wire.
    pub fn codes(&self) -> (u8, u8) {
        match *self {
            AbortRQSource::ServiceUser(reason) => (0, reason),
            AbortRQSource::Reserved(reason) => (1, reason),
            AbortRQSource::ServiceProvider(reason) => (2, reason.code()),
        }
    }
}

impl Display for AbortRQSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortRQSource::ServiceUser(_) => f.write_str("service user"),
            AbortRQSource::Reserved(_) => f.write_str("reserved source"),
            AbortRQSource::ServiceProvider(reason) => write!(f, "service provider: {}", reason),
        }
    }
}

/// An enumeration of A-ABORT PDU provider reasons.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQServiceProviderReason {
    /// Reason Not Specified
    ReasonNotSpecified,
    /// Unrecognized PDU
    UnrecognizedPdu,
    /// Unexpected PDU
    UnexpectedPdu,
    /// Unrecognized PDU parameter
    UnrecognizedPduParameter,
    /// Unexpected PDU parameter
    UnexpectedPduParameter,
    /// Invalid PDU parameter value
    InvalidPduParameter,
    /// Reserved code
    Reserved(u8),
}

impl AbortRQServiceProviderReason {
    pub(crate) fn from(reason: u8) -> Self {
        use AbortRQServiceProviderReason::*;
        match reason {
            0 => ReasonNotSpecified,
            1 => UnrecognizedPdu,
            2 => UnexpectedPdu,
            4 => UnrecognizedPduParameter,
            5 => UnexpectedPduParameter,
            6 => InvalidPduParameter,
            x => Reserved(x),
        }
    }

    pub fn code(self) -> u8 {
        use AbortRQServiceProviderReason::*;
        match self {
            ReasonNotSpecified => 0,
            UnrecognizedPdu => 1,
            UnexpectedPdu => 2,
            UnrecognizedPduParameter => 4,
            UnexpectedPduParameter => 5,
            InvalidPduParameter => 6,
            Reserved(x) => x,
        }
    }
}

impl Display for AbortRQServiceProviderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            AbortRQServiceProviderReason::ReasonNotSpecified => "reason not specified",
            AbortRQServiceProviderReason::UnrecognizedPdu => "unrecognized PDU",
            AbortRQServiceProviderReason::UnexpectedPdu => "unexpected PDU",
            AbortRQServiceProviderReason::UnrecognizedPduParameter => "unrecognized PDU parameter",
            AbortRQServiceProviderReason::UnexpectedPduParameter => "unexpected PDU parameter",
            AbortRQServiceProviderReason::InvalidPduParameter => "invalid PDU parameter value",
            AbortRQServiceProviderReason::Reserved(code) => {
                return write!(f, "reserved code {}", code)
            }
        };
        f.write_str(msg)
    }
}

/// An in-memory representation of a full Protocol Data Unit (PDU).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Pdu {
    /// Association request (A-ASSOCIATE-RQ)
    AssociationRQ(Negotiation),
    /// Association acknowledgement (A-ASSOCIATE-AC)
    AssociationAC(Negotiation),
    /// Association rejection (A-ASSOCIATE-RJ)
    AssociationRJ(AssociationRJ),
    /// P-Data
    PData { data: Vec<PDataValue> },
    /// Association release request (A-RELEASE-RQ)
    ReleaseRQ,
    /// Association release reply (A-RELEASE-RP)
    ReleaseRP,
    /// Association abort request (A-ABORT)
    AbortRQ { source: AbortRQSource },
}

impl Pdu {
    /// The PDU type code.
    pub fn pdu_type(&self) -> u8 {
        match self {
            Pdu::AssociationRQ(_) => pdu_type::A_ASSOCIATE_RQ,
            Pdu::AssociationAC(_) => pdu_type::A_ASSOCIATE_AC,
            Pdu::AssociationRJ(_) => pdu_type::A_ASSOCIATE_RJ,
            Pdu::PData { .. } => pdu_type::P_DATA_TF,
            Pdu::ReleaseRQ => pdu_type::A_RELEASE_RQ,
            Pdu::ReleaseRP => pdu_type::A_RELEASE_RP,
            Pdu::AbortRQ { .. } => pdu_type::A_ABORT,
        }
    }

    /// Provide a short description of the PDU.
    pub fn short_description(&self) -> impl std::fmt::Display + '_ {
        PduShortDescription(self)
    }
}

struct PduShortDescription<'a>(&'a Pdu);

impl std::fmt::Display for PduShortDescription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Pdu::AssociationRQ(rq) => write!(
                f,
                "AssociationRQ {{ {} -> {}, {} presentation contexts }}",
                rq.calling_ae_title,
                rq.called_ae_title,
                rq.presentation_contexts.len()
            ),
            Pdu::AssociationAC(ac) => write!(
                f,
                "AssociationAC {{ {} <- {}, {} presentation contexts }}",
                ac.calling_ae_title,
                ac.called_ae_title,
                ac.presentation_contexts.len()
            ),
            Pdu::AssociationRJ(rj) => write!(f, "AssociationRJ {{ {} }}", rj),
            Pdu::ReleaseRQ | Pdu::ReleaseRP => std::fmt::Debug::fmt(self.0, f),
            Pdu::AbortRQ { source } => write!(f, "AbortRQ {{ {} }}", source),
            Pdu::PData { data } => match data.as_slice() {
                [one] => write!(f, "PData [({:?}, {} bytes)]", one.value_type, one.data.len()),
                [first, second] => write!(
                    f,
                    "PData [({:?}, {} bytes), ({:?}, {} bytes)]",
                    first.value_type,
                    first.data.len(),
                    second.value_type,
                    second.data.len(),
                ),
                _ => write!(f, "PData [{} p-data values]", data.len()),
            },
        }
    }
}

impl From<AbortRQSource> for Pdu {
    fn from(source: AbortRQSource) -> Self {
        Pdu::AbortRQ { source }
    }
}
