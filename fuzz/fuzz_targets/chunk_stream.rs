//! Fuzz target for the chunk stream reader
//!
//! Arbitrary ciphertext must produce an error or clean end, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wisp_core::AeadReader;
use wisp_core::protocol::session_cipher;
use wisp_crypto::Method;
use wisp_transport::Buffer;

fuzz_target!(|data: &[u8]| {
    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(runtime) => runtime,
        Err(_) => return,
    };

    runtime.block_on(async {
        let Ok(cipher) = session_cipher(Method::ChaCha20Poly1305, &[0x17; 32], &[0x29; 32]) else {
            return;
        };
        let mut reader = AeadReader::new(data, cipher);
        let mut buffer = Buffer::new(4096);
        while let Ok(n) = reader.read_chunk(&mut buffer).await {
            if n == 0 {
                break;
            }
            buffer.truncate(0);
        }
    });
});
