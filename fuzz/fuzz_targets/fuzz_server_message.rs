#![no_main]

use libfuzzer_sys::fuzz_target;
use planning_poker_client::protocol::ServerMessage;

fuzz_target!(|data: &[u8]| {
    // Push channel frames arrive as text; decoding must never panic.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(message) = serde_json::from_str::<ServerMessage>(text) {
            // Whatever decodes must encode again.
            let _ = serde_json::to_string(&message);
        }
    }
});
