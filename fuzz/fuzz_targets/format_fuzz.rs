#![no_main]
use libfuzzer_sys::fuzz_target;
use romdelta::formats::{BpsPatch, IpsPatch, UpsPatch};
use romdelta::PatchOptions;

// Feed each parser directly so the fuzzer does not have to discover the
// magic bytes first.
fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let opts = PatchOptions {
        verify_checksums: false,
        allow_size_mismatch: true,
        ..Default::default()
    };
    let source = &rest[..rest.len().min(64)];

    match selector % 3 {
        0 => {
            let mut bytes = b"PATCH".to_vec();
            bytes.extend_from_slice(rest);
            if let Ok(p) = IpsPatch::load(bytes) {
                let _ = p.validate();
                let _ = p.apply(source, &opts);
            }
        }
        1 => {
            let mut bytes = b"UPS1".to_vec();
            bytes.extend_from_slice(rest);
            if let Ok(p) = UpsPatch::load(bytes) {
                let _ = p.validate();
                if p.target_size() <= 16 << 20 {
                    let _ = p.apply(source, &opts);
                }
            }
        }
        _ => {
            let mut bytes = b"BPS1".to_vec();
            bytes.extend_from_slice(rest);
            if let Ok(p) = BpsPatch::load(bytes) {
                let _ = p.validate();
                if p.target_size() <= 16 << 20 {
                    let _ = p.apply(source, &opts);
                }
            }
        }
    }
});
