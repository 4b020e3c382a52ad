#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Wire payload parsing should never panic on arbitrary input
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = serde_json::from_value::<krypta::host::protocol::GetCredentialsParams>(
            value.clone(),
        );
        let _ = serde_json::from_value::<krypta::host::protocol::SaveCredentialParams>(
            value.clone(),
        );
        let _ =
            serde_json::from_value::<krypta::host::protocol::PhishingCheckParams>(value.clone());
        let _ = serde_json::from_value::<krypta::host::protocol::UnlockParams>(value);
    }
});
