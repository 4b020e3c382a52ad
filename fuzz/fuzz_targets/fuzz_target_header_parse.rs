#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Header deserialization should never panic on arbitrary input
    let _ = serde_json::from_slice::<krypta::vault::header::VaultHeader>(data);
});
