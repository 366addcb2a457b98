#![no_main]
use libfuzzer_sys::fuzz_target;
use romdelta::{PatchOptions, load_patch_from_memory};

// Loading, validating and applying arbitrary bytes must only ever return
// errors.
fuzz_target!(|data: &[u8]| {
    let split = data.len() / 2;
    let (source, patch) = data.split_at(split);
    let Ok(patch) = load_patch_from_memory(patch) else {
        return;
    };
    let _ = patch.validate();
    if patch.metadata().target_size > 16 << 20 {
        return;
    }
    let _ = patch.apply(source, &PatchOptions::default());
    let _ = patch.apply(
        source,
        &PatchOptions {
            verify_checksums: false,
            allow_size_mismatch: true,
            ..Default::default()
        },
    );
});
