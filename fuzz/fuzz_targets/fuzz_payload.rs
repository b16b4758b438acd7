//! Fuzz target for inbound frame decoding.
//!
//! Any byte sequence must decode to a payload without panicking, and a
//! decoded payload must survive re-encoding unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_realtime::Payload;

fuzz_target!(|data: &[u8]| {
    let payload = Payload::from_bytes(data);

    // Accessors never fail, whatever the value types are.
    for key in payload.keys() {
        let _ = payload.get_str(key);
        let _ = payload.get_i64(key);
        let _ = payload.get_f64(key);
        let _ = payload.get_bool(key);
    }

    let reencoded = Payload::from_bytes(&payload.to_bytes());
    assert_eq!(payload, reencoded);
});
