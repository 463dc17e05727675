#![no_main]

use libfuzzer_sys::fuzz_target;
use planning_poker_client::protocol::GameSnapshot;

fuzz_target!(|data: &[u8]| {
    // HTTP snapshot bodies: null lists and string-or-number change ids.
    if let Ok(snapshot) = serde_json::from_slice::<GameSnapshot>(data) {
        for player in &snapshot.players {
            let _ = player.revealed_vote();
        }
        let _ = snapshot.cards_deck.selectable();
    }
});
