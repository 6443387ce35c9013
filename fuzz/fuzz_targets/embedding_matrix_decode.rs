#![no_main]

use imagedb::storage::decode_embeddings;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((dim, rows)) = decode_embeddings(data) {
        assert!(dim > 0);
        assert_eq!(rows.len() % dim, 0);
    }
});
