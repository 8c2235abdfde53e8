#![no_main]

use libfuzzer_sys::fuzz_target;
use dotpatch::{
    assembly::{decode, encode},
    metadata::body::TokenTable,
    EngineConfig,
};

fuzz_target!(|data: &[u8]| {
    if let Ok(stream) = decode(data, &TokenTable::new()) {
        let _ = encode(&stream, false, &EngineConfig::default());
    }
});
