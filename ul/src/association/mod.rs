//! Negotiated association parameters
//!
//! This module holds the parameters which an association agrees on
//! during its establishment,
//! in a form which the [DIMSE codec](crate::dimse) can query
//! while it fragments and reassembles messages.
//!
//! The connection life cycle itself is not handled here.
//! The association layer owning the transport
//! builds a [`NegotiatedAssociation`]
//! from the exchanged A-ASSOCIATE-RQ and A-ASSOCIATE-AC values
//! via [`AssociationOptions`],
//! or provides its own implementation of [`AssociationContext`].
//!
//! # Example
//!
//! ```
//! # use dicom_ul_codec::association::{AssociationContext, AssociationOptions};
//! # use dicom_ul_codec::pdu::{Negotiation, PresentationContext};
//! let mut rq = Negotiation::new("STORE-SCU", "STORE-SCP");
//! rq.add_presentation_context_for("1.2.840.10008.5.1.4.1.1.7", "1.2.840.10008.1.2.1");
//!
//! let mut ac = Negotiation::new("STORE-SCU", "STORE-SCP");
//! ac.max_pdu_length = 32_768;
//! ac.add_presentation_context(PresentationContext::accepted(1, "1.2.840.10008.1.2.1"));
//!
//! let association = AssociationOptions::new()
//!     .max_pdu_length(16_384)
//!     .establish_requestor(&rq, &ac);
//!
//! assert_eq!(association.max_pdu_length_send(), 32_768);
//! let pc = association.presentation_context(1).unwrap();
//! assert_eq!(pc.abstract_syntax.as_deref(), Some("1.2.840.10008.5.1.4.1.1.7"));
//! ```
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::dimse::CommandField;
use crate::pdu::{
    Negotiation, PresentationContext, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE,
};

/// The view of an established association
/// which the DIMSE decoder and encoder depend on.
///
/// Every accessor may be called concurrently
/// by the reading and the writing side of the same association.
pub trait AssociationContext {
    /// Look up a presentation context by its identifier.
    fn presentation_context(&self, id: u8) -> Option<&PresentationContext>;

    /// The maximum length of the PDUs sent to the peer.
    ///
    /// 0 means that the peer imposes no limit.
    fn max_pdu_length_send(&self) -> u32;

    /// The maximum length of the PDUs expected from the peer.
    fn max_pdu_length_receive(&self) -> u32;

    /// Whether incoming PDUs larger than
    /// [the receive maximum](AssociationContext::max_pdu_length_receive)
    /// are refused.
    fn strict(&self) -> bool {
        true
    }

    /// Whether the data set of a message may start
    /// in the same P-DATA-TF PDU as the end of its command.
    fn pack_pdv(&self) -> bool {
        true
    }

    /// Called once for each DIMSE message put on the wire,
    /// except for responses with a pending status.
    fn record_sent(&self, _command_field: CommandField) {}

    /// Whether the association is in a state
    /// in which P-DATA-TF PDUs may be sent.
    fn can_send_pdata(&self) -> bool {
        true
    }

    /// Called when writing to the transport fails.
    fn on_transport_error(&self, _error: &std::io::Error) {}
}

impl<T> AssociationContext for &T
where
    T: ?Sized + AssociationContext,
{
    fn presentation_context(&self, id: u8) -> Option<&PresentationContext> {
        (**self).presentation_context(id)
    }

    fn max_pdu_length_send(&self) -> u32 {
        (**self).max_pdu_length_send()
    }

    fn max_pdu_length_receive(&self) -> u32 {
        (**self).max_pdu_length_receive()
    }

    fn strict(&self) -> bool {
        (**self).strict()
    }

    fn pack_pdv(&self) -> bool {
        (**self).pack_pdv()
    }

    fn record_sent(&self, command_field: CommandField) {
        (**self).record_sent(command_field)
    }

    fn can_send_pdata(&self) -> bool {
        (**self).can_send_pdata()
    }

    fn on_transport_error(&self, error: &std::io::Error) {
        (**self).on_transport_error(error)
    }
}

impl<T> AssociationContext for Arc<T>
where
    T: ?Sized + AssociationContext,
{
    fn presentation_context(&self, id: u8) -> Option<&PresentationContext> {
        (**self).presentation_context(id)
    }

    fn max_pdu_length_send(&self) -> u32 {
        (**self).max_pdu_length_send()
    }

    fn max_pdu_length_receive(&self) -> u32 {
        (**self).max_pdu_length_receive()
    }

    fn strict(&self) -> bool {
        (**self).strict()
    }

    fn pack_pdv(&self) -> bool {
        (**self).pack_pdv()
    }

    fn record_sent(&self, command_field: CommandField) {
        (**self).record_sent(command_field)
    }

    fn can_send_pdata(&self) -> bool {
        (**self).can_send_pdata()
    }

    fn on_transport_error(&self, error: &std::io::Error) {
        (**self).on_transport_error(error)
    }
}

/// Local options applied when an association is established.
///
/// # Example
///
/// ```
/// # use dicom_ul_codec::association::AssociationOptions;
/// let options = AssociationOptions::new()
///     .max_pdu_length(65_536)
///     .pack_pdv(false)
///     .strict(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationOptions {
    /// the maximum PDU length this node accepts
    max_pdu_length: u32,
    /// the maximum PDU length this node sends, 0 for no local limit
    send_max_pdu_length: u32,
    /// whether to pack command and data set fragments in one PDU
    pack_pdv: bool,
    /// whether to refuse PDUs over the maximum PDU length
    strict: bool,
}

impl Default for AssociationOptions {
    fn default() -> Self {
        AssociationOptions {
            max_pdu_length: DEFAULT_MAX_PDU,
            send_max_pdu_length: 0,
            pack_pdv: true,
            strict: true,
        }
    }
}

impl AssociationOptions {
    /// Create a new set of options with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the maximum PDU length that this node accepts.
    ///
    /// This should be the same value announced in the user information
    /// of this node's association request or acceptance.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Limit the length of the PDUs sent by this node,
    /// even if the peer would accept larger ones.
    ///
    /// The default is 0, which only applies the peer's limit.
    pub fn send_max_pdu_length(mut self, value: u32) -> Self {
        self.send_max_pdu_length = value;
        self
    }

    /// Override whether data set fragments may share a PDU
    /// with the end of their command.
    pub fn pack_pdv(mut self, pack_pdv: bool) -> Self {
        self.pack_pdv = pack_pdv;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Build the association parameters on the requesting side,
    /// which sent `rq` and received `ac` in return.
    pub fn establish_requestor(&self, rq: &Negotiation, ac: &Negotiation) -> NegotiatedAssociation {
        self.establish(rq, ac, ac.max_pdu_length)
    }

    /// Build the association parameters on the accepting side,
    /// which received `rq` and replied with `ac`.
    pub fn establish_acceptor(&self, rq: &Negotiation, ac: &Negotiation) -> NegotiatedAssociation {
        self.establish(rq, ac, rq.max_pdu_length)
    }

    fn establish(
        &self,
        rq: &Negotiation,
        ac: &Negotiation,
        peer_max_pdu_length: u32,
    ) -> NegotiatedAssociation {
        let presentation_contexts: Vec<_> = ac
            .presentation_contexts
            .iter()
            .filter_map(|pc| {
                let Some(proposed) = rq.presentation_context(pc.id) else {
                    warn!("Presentation context {} was never proposed", pc.id);
                    return None;
                };
                Some(PresentationContext {
                    abstract_syntax: proposed.abstract_syntax.clone(),
                    ..pc.clone()
                })
            })
            .collect();

        let max_pdu_length_receive = if self.max_pdu_length == 0 {
            MAXIMUM_PDU_SIZE
        } else {
            self.max_pdu_length.clamp(MINIMUM_PDU_SIZE, MAXIMUM_PDU_SIZE)
        };
        let max_pdu_length_send = min_zero_as_max(peer_max_pdu_length, self.send_max_pdu_length);

        debug!(
            "Association established with {} presentation contexts, max PDU length {} (send) / {} (receive)",
            presentation_contexts.len(),
            max_pdu_length_send,
            max_pdu_length_receive
        );

        NegotiatedAssociation {
            presentation_contexts,
            max_pdu_length_send,
            max_pdu_length_receive,
            max_ops_invoked: ac.max_ops_invoked,
            max_ops_performed: ac.max_ops_performed,
            pack_pdv: self.pack_pdv,
            strict: self.strict,
            closed: AtomicBool::new(false),
            sent: Mutex::new(BTreeMap::new()),
        }
    }
}

/// Combine two maximum lengths where 0 stands for no limit.
fn min_zero_as_max(a: u32, b: u32) -> u32 {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

/// The parameters of an established association.
///
/// Presentation contexts and PDU lengths are fixed on creation.
/// The association also keeps a count of the messages sent
/// for each command field.
#[derive(Debug)]
pub struct NegotiatedAssociation {
    presentation_contexts: Vec<PresentationContext>,
    max_pdu_length_send: u32,
    max_pdu_length_receive: u32,
    max_ops_invoked: u16,
    max_ops_performed: u16,
    pack_pdv: bool,
    strict: bool,
    closed: AtomicBool,
    sent: Mutex<BTreeMap<CommandField, u64>>,
}

impl NegotiatedAssociation {
    /// The presentation contexts as answered by the acceptor,
    /// including rejected ones.
    pub fn presentation_contexts(&self) -> &[PresentationContext] {
        &self.presentation_contexts
    }

    /// The negotiated asynchronous operations window,
    /// as (invoked, performed).
    pub fn async_ops_window(&self) -> (u16, u16) {
        (self.max_ops_invoked, self.max_ops_performed)
    }

    /// The number of messages sent so far with the given command field.
    pub fn sent_count(&self, command_field: CommandField) -> u64 {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command_field)
            .copied()
            .unwrap_or(0)
    }

    /// Declare the association as no longer open,
    /// after which no more P-DATA-TF PDUs may be sent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the association was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AssociationContext for NegotiatedAssociation {
    fn presentation_context(&self, id: u8) -> Option<&PresentationContext> {
        self.presentation_contexts.iter().find(|pc| pc.id == id)
    }

    fn max_pdu_length_send(&self) -> u32 {
        self.max_pdu_length_send
    }

    fn max_pdu_length_receive(&self) -> u32 {
        self.max_pdu_length_receive
    }

    fn strict(&self) -> bool {
        self.strict
    }

    fn pack_pdv(&self) -> bool {
        self.pack_pdv
    }

    fn record_sent(&self, command_field: CommandField) {
        *self
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(command_field)
            .or_insert(0) += 1;
    }

    fn can_send_pdata(&self) -> bool {
        !self.is_closed()
    }

    fn on_transport_error(&self, error: &std::io::Error) {
        warn!("Transport failure, closing association: {}", error);
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::PresentationContextResultReason;

    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    const SC_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";
    const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

    fn negotiation_pair() -> (Negotiation, Negotiation) {
        let mut rq = Negotiation::new("SCU", "SCP");
        rq.max_pdu_length = 16_384;
        rq.add_presentation_context_for(CT_IMAGE_STORAGE, EXPLICIT_VR_LE);
        rq.add_presentation_context_for(SC_IMAGE_STORAGE, EXPLICIT_VR_LE);

        let mut ac = Negotiation::new("SCU", "SCP");
        ac.max_pdu_length = 0;
        ac.add_presentation_context(PresentationContext::accepted(1, EXPLICIT_VR_LE));
        ac.add_presentation_context(PresentationContext::rejected(
            3,
            PresentationContextResultReason::AbstractSyntaxNotSupported,
        ));
        // never proposed
        ac.add_presentation_context(PresentationContext::accepted(9, EXPLICIT_VR_LE));
        (rq, ac)
    }

    #[test]
    fn zero_means_no_limit() {
        assert_eq!(min_zero_as_max(0, 0), 0);
        assert_eq!(min_zero_as_max(0, 16_384), 16_384);
        assert_eq!(min_zero_as_max(32_768, 0), 32_768);
        assert_eq!(min_zero_as_max(32_768, 16_384), 16_384);
    }

    #[test]
    fn requestor_takes_the_acceptor_limit() {
        let (rq, ac) = negotiation_pair();
        let association = AssociationOptions::new()
            .send_max_pdu_length(65_536)
            .establish_requestor(&rq, &ac);
        assert_eq!(association.max_pdu_length_send(), 65_536);
        assert_eq!(association.max_pdu_length_receive(), DEFAULT_MAX_PDU);

        let association = AssociationOptions::new().establish_requestor(&rq, &ac);
        assert_eq!(association.max_pdu_length_send(), 0);
    }

    #[test]
    fn acceptor_takes_the_requestor_limit() {
        let (rq, ac) = negotiation_pair();
        let association = AssociationOptions::new()
            .max_pdu_length(0)
            .establish_acceptor(&rq, &ac);
        assert_eq!(association.max_pdu_length_send(), 16_384);
        assert_eq!(association.max_pdu_length_receive(), MAXIMUM_PDU_SIZE);
    }

    #[test]
    fn presentation_contexts_carry_the_proposed_abstract_syntax() {
        let (rq, ac) = negotiation_pair();
        let association = AssociationOptions::new().establish_requestor(&rq, &ac);
        assert_eq!(association.presentation_contexts().len(), 2);

        let pc = association.presentation_context(1).unwrap();
        assert!(pc.is_accepted());
        assert_eq!(pc.abstract_syntax.as_deref(), Some(CT_IMAGE_STORAGE));
        assert_eq!(pc.transfer_syntax(), Some(EXPLICIT_VR_LE));

        let pc = association.presentation_context(3).unwrap();
        assert!(!pc.is_accepted());
        assert_eq!(pc.abstract_syntax.as_deref(), Some(SC_IMAGE_STORAGE));

        assert!(association.presentation_context(9).is_none());
    }

    #[test]
    fn counts_sent_messages() {
        let (rq, ac) = negotiation_pair();
        let association = AssociationOptions::new().establish_requestor(&rq, &ac);
        let context: &dyn AssociationContext = &association;
        context.record_sent(CommandField::C_STORE_RQ);
        context.record_sent(CommandField::C_STORE_RQ);
        context.record_sent(CommandField::C_ECHO_RQ);
        assert_eq!(association.sent_count(CommandField::C_STORE_RQ), 2);
        assert_eq!(association.sent_count(CommandField::C_ECHO_RQ), 1);
        assert_eq!(association.sent_count(CommandField::C_FIND_RQ), 0);
    }

    #[test]
    fn transport_errors_close_the_association() {
        let (rq, ac) = negotiation_pair();
        let association = Arc::new(AssociationOptions::new().establish_requestor(&rq, &ac));
        assert!(association.can_send_pdata());
        association.on_transport_error(&std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(!association.can_send_pdata());
        assert!(association.is_closed());
    }
}
