//! Fuzz target for InboundFrame::parse
//!
//! Relay frames are attacker-influenced JSON. This fuzzer feeds arbitrary
//! bytes through the parser to find:
//! - Panics on malformed JSON or unexpected value types
//! - Panics on unknown `type` tags
//! - Panics on missing, duplicated, or extra fields
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use hushwire_proto::InboundFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The channel only hands UTF-8 text frames to the parser.
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = InboundFrame::parse(text);
    }
});
