#![no_main]

use libfuzzer_sys::fuzz_target;
use mahjong_match_client::protocol::{decode_action_reply, decode_start_response};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Never panics; embedded states are either valid or rejected.
        if let Ok(response) = decode_start_response(text) {
            assert!(response.state.validate().is_ok());
        }
        let _ = decode_action_reply(text);
    }
});
