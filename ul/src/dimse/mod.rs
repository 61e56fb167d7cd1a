//! DIMSE message transport over presentation data values
//!
//! This module sits between the PDU codec and the DIMSE services.
//! A DIMSE message is a command set, optionally followed by a data set,
//! each sent as a sequence of PDV fragments
//! of the same presentation context,
//! the last of which is marked as such.
//!
//! - [`PduDecoder`] reads PDUs, reassembles the command set of each message
//!   and hands it over to an [`AssociationHandler`],
//!   along with the data set bytes.
//! - [`PduEncoder`] encodes a command set and streams a data set
//!   from a [`DataWriter`] into P-DATA-TF PDUs
//!   bounded by the maximum length accepted by the peer.
//!
//! Command sets are encoded in Implicit VR Little Endian.
//! The data set bytes are left in the transfer syntax
//! of the presentation context.
pub mod command;
pub mod decoder;
pub mod encoder;

pub use command::CommandField;
pub use decoder::{AssociationHandler, PduDecoder, PdvInput, PdvReader};
pub use encoder::{DataWriter, PduEncoder, PdvOutput, PdvWriter};
