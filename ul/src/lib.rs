//! This crate contains the codec of the DICOM upper layer protocol
//! and the fragmentation of DIMSE messages into presentation data values.
//!
//! It does not open connections nor run the association state machine:
//! it is meant to be driven by an association implementation
//! which owns the transport.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_
//!   and the association negotiation parameters they carry,
//!   along with readers and writers of whole PDUs.
//! - The [`association`] module
//!   holds the parameters agreed on association establishment
//!   which drive the DIMSE codec.
//! - The [`dimse`] module
//!   comprises the [`PduDecoder`], which reassembles commands and data sets
//!   from incoming P-DATA-TF PDUs,
//!   and the [`PduEncoder`], which splits outgoing messages
//!   into PDUs bounded by the negotiated maximum length.
//!
//! ## Features
//! * `async`: Enables reading and writing PDUs over tokio's asynchronous I/O.
//!   See [`pdu::nonblocking`].

pub mod association;
pub mod dimse;
pub mod pdu;

/// The current implementation class UID generically referring to DICOM-rs.
///
/// Automatically generated as per the standard, part 5, section B.2.
///
/// This UID may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.156227610253341005307660858504280353500";

/// The current implementation version name generically referring to DICOM-rs.
///
/// This name may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOM-rs UL 0.1";

// re-exports

pub use association::{AssociationContext, AssociationOptions, NegotiatedAssociation};
pub use dimse::{AssociationHandler, CommandField, DataWriter, PduDecoder, PduEncoder};
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::{Negotiation, Pdu};
