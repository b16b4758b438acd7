//! Fuzz target for the node's client command protocol.
//!
//! Tests that command parsing handles arbitrary frames without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_node::commands::ClientCommand;
use tether_realtime::Payload;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<ClientCommand>(data);

    // The handler parses commands from decoded payloads.
    let payload = Payload::from_bytes(data);
    if let Ok(command) = serde_json::from_value::<ClientCommand>(payload.into_value()) {
        let encoded = serde_json::to_vec(&command).unwrap_or_default();
        let reparsed = serde_json::from_slice::<ClientCommand>(&encoded).ok();
        assert_eq!(reparsed, Some(command));
    }
});
