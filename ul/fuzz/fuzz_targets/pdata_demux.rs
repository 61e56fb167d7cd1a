#![no_main]
use dicom_object::InMemDicomObject;
use dicom_ul_codec::association::AssociationOptions;
use dicom_ul_codec::dimse::{AssociationHandler, CommandField, PduDecoder, PdvInput};
use dicom_ul_codec::pdu::{Negotiation, PresentationContext};
use libfuzzer_sys::fuzz_target;

struct Sink;

impl AssociationHandler for Sink {
    fn on_dimse_rq(
        &mut self,
        _pc: &PresentationContext,
        _command_field: CommandField,
        _command: InMemDicomObject,
        data: Option<&mut dyn PdvInput>,
    ) -> std::io::Result<()> {
        if let Some(data) = data {
            data.skip(16)?;
        }
        Ok(())
    }

    fn on_dimse_rsp(
        &mut self,
        _pc: &PresentationContext,
        _command_field: CommandField,
        _command: InMemDicomObject,
        _data: Option<Vec<u8>>,
    ) {
    }
}

fuzz_target!(|data: &[u8]| {
    let mut rq = Negotiation::new("SCU", "SCP");
    rq.add_presentation_context_for("1.2.840.10008.1.1", "1.2.840.10008.1.2");
    let mut ac = Negotiation::new("SCU", "SCP");
    ac.add_presentation_context(PresentationContext::accepted(1, "1.2.840.10008.1.2"));
    let association = AssociationOptions::new().establish_acceptor(&rq, &ac);

    // decode until the input is exhausted or rejected
    let mut decoder = PduDecoder::new(data, &association);
    while decoder.next_pdu(&mut Sink).is_ok() {}
});
