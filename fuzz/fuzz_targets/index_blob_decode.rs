#![no_main]

use imagedb::storage::decode_index_blob;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(store) = decode_index_blob(data) {
        let _ = store.search(&vec![0.0; store.dim().min(4096)], 4);
    }
});
