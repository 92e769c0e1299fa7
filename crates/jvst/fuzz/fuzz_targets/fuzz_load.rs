//! Fuzz target: load arbitrary bytes as a serialized program.
//!
//! `CompiledSchema::load` must reject anything malformed with an error. When a
//! program does load, running it over a small document must not panic.

#![no_main]

use jvst::{CompiledSchema, LimitedTracker, NoopTracer, ResourceLimits};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(schema) = CompiledSchema::load(data) else {
        return;
    };
    let limits = ResourceLimits::new().max_instructions(100_000).max_call_depth(Some(32));
    let mut validator = schema.validator_with(LimitedTracker::new(limits), NoopTracer);
    if validator.validate_more(br#"{"a": [1, "b", null, {"c": true}]}"#).is_ok() {
        let _ = validator.validate_close();
    }
});
