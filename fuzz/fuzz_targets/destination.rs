//! Fuzz target for destination address decoding
//!
//! Decoding must never panic, and anything it accepts must re-encode to the
//! bytes it consumed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wisp_transport::Destination;

fuzz_target!(|data: &[u8]| {
    if let Ok((destination, consumed)) = Destination::decode(data) {
        assert!(consumed <= data.len());
        assert_eq!(destination.encoded_len(), consumed);

        let mut encoded = Vec::new();
        destination.encode(&mut encoded);
        assert_eq!(&encoded[..], &data[..consumed]);
    }

    let _ = Destination::wire_len(data);
});
