//! Fuzz target for payload construction.
//!
//! Builds payloads from arbitrary typed fields and checks that the accessors
//! return what was stored after a trip through the wire encoding.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tether_realtime::Payload;

#[derive(Debug, Arbitrary)]
enum Field {
    Text(String, String),
    Integer(String, i64),
    Flag(String, bool),
}

impl Field {
    fn key(&self) -> &str {
        match self {
            Field::Text(key, _) | Field::Integer(key, _) | Field::Flag(key, _) => key,
        }
    }
}

fuzz_target!(|fields: Vec<Field>| {
    let mut payload = Payload::new();
    for field in &fields {
        match field {
            Field::Text(key, value) => payload.set(key.clone(), value.clone()),
            Field::Integer(key, value) => payload.set(key.clone(), *value),
            Field::Flag(key, value) => payload.set(key.clone(), *value),
        }
    }

    let decoded = Payload::from_bytes(&payload.to_bytes());
    assert_eq!(decoded, payload);

    // Later writes to a key win.
    for (i, field) in fields.iter().enumerate() {
        if fields[i + 1..].iter().any(|later| later.key() == field.key()) {
            continue;
        }
        match field {
            Field::Text(key, value) => assert_eq!(decoded.get_str(key), value),
            Field::Integer(key, value) => assert_eq!(decoded.get_i64(key), *value),
            Field::Flag(key, value) => assert_eq!(decoded.get_bool(key), *value),
        }
    }
});
