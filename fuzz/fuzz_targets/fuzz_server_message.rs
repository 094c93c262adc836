#![no_main]

use libfuzzer_sys::fuzz_target;
use mahjong_match_client::protocol::{decode_server_message, encode_server_message};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Anything that decodes (and validates) must survive re-encoding.
    if let Ok(message) = decode_server_message(text) {
        let encoded = encode_server_message(&message).unwrap();
        let again = decode_server_message(&encoded).unwrap();
        assert_eq!(message, again);
    }
});
