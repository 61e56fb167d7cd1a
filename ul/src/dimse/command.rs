//! DIMSE command set codes and accessors.
//!
//! Command sets are always encoded in Implicit VR Little Endian,
//! regardless of the transfer syntax of the presentation context.
use std::fmt::Display;
use std::io::{Read, Write};

use dicom_dictionary_std::tags;
use dicom_object::{InMemDicomObject, ReadError, WriteError};
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;

#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Priority {
    Low = 0x0002,
    Medium = 0x0000,
    High = 0x0001,
}

/// Value of the Command Data Set Type attribute (0000,0800).
#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum CommandDatasetType {
    Present = 0x0001,
    Absent = 0x0101,
}

/// DIMSE message type,
/// as identified by the Command Field attribute (0000,0100).
#[repr(u16)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CommandField {
    C_STORE_RQ = 0x0001,
    C_STORE_RSP = 0x8001,
    C_GET_RQ = 0x0010,
    C_GET_RSP = 0x8010,
    C_FIND_RQ = 0x0020,
    C_FIND_RSP = 0x8020,
    C_MOVE_RQ = 0x0021,
    C_MOVE_RSP = 0x8021,
    C_ECHO_RQ = 0x0030,
    C_ECHO_RSP = 0x8030,
    N_EVENT_REPORT_RQ = 0x0100,
    N_EVENT_REPORT_RSP = 0x8100,
    N_GET_RQ = 0x0110,
    N_GET_RSP = 0x8110,
    N_SET_RQ = 0x0120,
    N_SET_RSP = 0x8120,
    N_ACTION_RQ = 0x0130,
    N_ACTION_RSP = 0x8130,
    N_CREATE_RQ = 0x0140,
    N_CREATE_RSP = 0x8140,
    N_DELETE_RQ = 0x0150,
    N_DELETE_RSP = 0x8150,
    C_CANCEL_RQ = 0x0FFF,
}

impl CommandField {
    /// Look up a command field by its code.
    pub fn from_code(code: u16) -> Option<Self> {
        use CommandField::*;
        Some(match code {
            0x0001 => C_STORE_RQ,
            0x8001 => C_STORE_RSP,
            0x0010 => C_GET_RQ,
            0x8010 => C_GET_RSP,
            0x0020 => C_FIND_RQ,
            0x8020 => C_FIND_RSP,
            0x0021 => C_MOVE_RQ,
            0x8021 => C_MOVE_RSP,
            0x0030 => C_ECHO_RQ,
            0x8030 => C_ECHO_RSP,
            0x0100 => N_EVENT_REPORT_RQ,
            0x8100 => N_EVENT_REPORT_RSP,
            0x0110 => N_GET_RQ,
            0x8110 => N_GET_RSP,
            0x0120 => N_SET_RQ,
            0x8120 => N_SET_RSP,
            0x0130 => N_ACTION_RQ,
            0x8130 => N_ACTION_RSP,
            0x0140 => N_CREATE_RQ,
            0x8140 => N_CREATE_RSP,
            0x0150 => N_DELETE_RQ,
            0x8150 => N_DELETE_RSP,
            0x0FFF => C_CANCEL_RQ,
            _ => return None,
        })
    }

    /// The code of this command field.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether this is a response message.
    pub fn is_response(self) -> bool {
        self.code() & 0x8000 != 0
    }
}

impl Display for CommandField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CommandField::*;
        let name = match self {
            C_STORE_RQ => "C-STORE-RQ",
            C_STORE_RSP => "C-STORE-RSP",
            C_GET_RQ => "C-GET-RQ",
            C_GET_RSP => "C-GET-RSP",
            C_FIND_RQ => "C-FIND-RQ",
            C_FIND_RSP => "C-FIND-RSP",
            C_MOVE_RQ => "C-MOVE-RQ",
            C_MOVE_RSP => "C-MOVE-RSP",
            C_ECHO_RQ => "C-ECHO-RQ",
            C_ECHO_RSP => "C-ECHO-RSP",
            N_EVENT_REPORT_RQ => "N-EVENT-REPORT-RQ",
            N_EVENT_REPORT_RSP => "N-EVENT-REPORT-RSP",
            N_GET_RQ => "N-GET-RQ",
            N_GET_RSP => "N-GET-RSP",
            N_SET_RQ => "N-SET-RQ",
            N_SET_RSP => "N-SET-RSP",
            N_ACTION_RQ => "N-ACTION-RQ",
            N_ACTION_RSP => "N-ACTION-RSP",
            N_CREATE_RQ => "N-CREATE-RQ",
            N_CREATE_RSP => "N-CREATE-RSP",
            N_DELETE_RQ => "N-DELETE-RQ",
            N_DELETE_RSP => "N-DELETE-RSP",
            C_CANCEL_RQ => "C-CANCEL-RQ",
        };
        f.write_str(name)
    }
}

fn uint16(command: &InMemDicomObject, tag: dicom_core::Tag) -> Option<u16> {
    command.get(tag).and_then(|e| e.to_int::<u16>().ok())
}

/// Retrieve the message type of a command set.
///
/// Returns `None` if the Command Field is missing or unknown.
pub fn command_field(command: &InMemDicomObject) -> Option<CommandField> {
    CommandField::from_code(uint16(command, tags::COMMAND_FIELD).unwrap_or(0))
}

/// Retrieve the Message ID (0000,0110) of a request.
pub fn message_id(command: &InMemDicomObject) -> Option<u16> {
    uint16(command, tags::MESSAGE_ID)
}

/// Retrieve the Status (0000,0900) of a response.
pub fn status(command: &InMemDicomObject) -> Option<u16> {
    uint16(command, tags::STATUS)
}

/// Whether the status code of a response
/// announces more responses to the same request.
pub fn is_pending_status(status: u16) -> bool {
    matches!(status, 0xFF00 | 0xFF01)
}

/// Whether a data set follows the command.
///
/// Only an explicit Command Data Set Type of
/// [`CommandDatasetType::Absent`] declares a message without a data set.
pub fn has_dataset(command: &InMemDicomObject) -> bool {
    uint16(command, tags::COMMAND_DATA_SET_TYPE).unwrap_or(0) != CommandDatasetType::Absent as u16
}

/// Decode a command set from its Implicit VR Little Endian encoding.
pub fn read_command<R>(reader: R) -> Result<InMemDicomObject, ReadError>
where
    R: Read,
{
    InMemDicomObject::read_dataset_with_ts(reader, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
}

/// Encode a command set in Implicit VR Little Endian.
pub fn write_command<W>(command: &InMemDicomObject, writer: W) -> Result<(), WriteError>
where
    W: Write,
{
    command.write_dataset_with_ts(writer, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::uids::VERIFICATION;

    fn c_echo_rsp(status: u16) -> InMemDicomObject {
        InMemDicomObject::command_from_element_iter([
            DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, VERIFICATION),
            DataElement::new(
                tags::COMMAND_FIELD,
                VR::US,
                dicom_value!(U16, [CommandField::C_ECHO_RSP.code()]),
            ),
            DataElement::new(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, dicom_value!(U16, [7])),
            DataElement::new(
                tags::COMMAND_DATA_SET_TYPE,
                VR::US,
                dicom_value!(U16, [CommandDatasetType::Absent as u16]),
            ),
            DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status])),
        ])
    }

    #[test]
    fn command_field_codes() {
        assert_eq!(CommandField::from_code(0x0001), Some(CommandField::C_STORE_RQ));
        assert_eq!(CommandField::from_code(0x0FFF), Some(CommandField::C_CANCEL_RQ));
        assert_eq!(CommandField::from_code(0x0000), None);
        assert_eq!(CommandField::from_code(0x8002), None);
        assert_eq!(CommandField::N_EVENT_REPORT_RSP.code(), 0x8100);
        assert!(CommandField::C_FIND_RSP.is_response());
        assert!(!CommandField::C_CANCEL_RQ.is_response());
        assert_eq!(CommandField::N_EVENT_REPORT_RQ.to_string(), "N-EVENT-REPORT-RQ");
    }

    #[test]
    fn command_accessors() {
        let rsp = c_echo_rsp(0x0000);
        assert_eq!(command_field(&rsp), Some(CommandField::C_ECHO_RSP));
        assert_eq!(status(&rsp), Some(0));
        assert_eq!(message_id(&rsp), None);
        assert!(!has_dataset(&rsp));

        // absent data set type defaults to a data set being present
        let rq = InMemDicomObject::command_from_element_iter([DataElement::new(
            tags::MESSAGE_ID,
            VR::US,
            dicom_value!(U16, [3]),
        )]);
        assert_eq!(command_field(&rq), None);
        assert_eq!(message_id(&rq), Some(3));
        assert!(has_dataset(&rq));
    }

    #[test]
    fn pending_statuses() {
        assert!(is_pending_status(0xFF00));
        assert!(is_pending_status(0xFF01));
        assert!(!is_pending_status(0x0000));
        assert!(!is_pending_status(0xFE00));
    }

    #[test]
    fn commands_are_implicit_vr_le() {
        let rsp = c_echo_rsp(0xFF00);
        let mut bytes = Vec::new();
        write_command(&rsp, &mut bytes).unwrap();
        // starts with (0000,0000) UL, length 4
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 4, 0, 0, 0]);

        let decoded = read_command(&bytes[..]).unwrap();
        assert_eq!(command_field(&decoded), Some(CommandField::C_ECHO_RSP));
        assert_eq!(status(&decoded), Some(0xFF00));
    }
}
