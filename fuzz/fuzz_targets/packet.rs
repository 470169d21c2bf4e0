//! Fuzz target for datagram parsing
//!
//! Feeds arbitrary bytes to the header decryption of every method and to
//! the client-side response decoder.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wisp_core::ClientPacketCodec;
use wisp_core::udp::DatagramCipher;
use wisp_crypto::Method;
use wisp_transport::Buffer;

const PSK: [u8; 32] = [0x17; 32];

fuzz_target!(|data: &[u8]| {
    for method in Method::ALL {
        if let Ok(cipher) = DatagramCipher::new(method, &PSK) {
            let mut buffer = Buffer::from_slice(data);
            let _ = cipher.open_header(&mut buffer);
        }

        if let Ok(mut codec) = ClientPacketCodec::new(method, &PSK) {
            assert!(codec.decode(data).is_err() || codec.server_session_id().is_some());
        }
    }
});
