#![no_main]
use std::error::Error;

use dicom_ul_codec::pdu::{read_pdu, write_pdu, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, bool, &[u8])| {
    let (maxlen, strict, data) = data;
    let maxlen = maxlen.clamp(MINIMUM_PDU_SIZE, MAXIMUM_PDU_SIZE);
    let _ = fuzz(maxlen, strict, data);
});

fn fuzz(maxlen: u32, strict: bool, mut data: &[u8]) -> Result<(), Box<dyn Error>> {
    // any PDU accepted by the reader
    let pdu = read_pdu(&mut data, maxlen, strict)?;

    // must be written back
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu)?;

    // and read again to the same value
    let pdu2 = read_pdu(&mut bytes.as_slice(), MAXIMUM_PDU_SIZE, false)
        .expect("serialized pdu should always deserialize");
    assert_eq!(
        pdu, pdu2,
        "pdu should be equal after serializing to/from bytes"
    );

    Ok(())
}
