//! Fuzz target for the deduplicator.
//!
//! Feeds arbitrary (source, time id) pairs and checks that acceptance
//! always agrees with a per-source maximum.

#![no_main]

use graphdb_proxy::Deduplicator;
use libfuzzer_sys::fuzz_target;
use std::collections::HashMap;

fuzz_target!(|events: Vec<(u8, u64)>| {
    let dedup = Deduplicator::new();
    let mut highest: HashMap<u8, u64> = HashMap::new();

    for (source, time_id) in events {
        let source_id = format!("s{}", source % 8);
        let expected = highest.get(&(source % 8)).map_or(true, |&w| time_id > w);
        assert_eq!(dedup.is_new_event(&source_id, time_id), expected);
        if expected {
            highest.insert(source % 8, time_id);
        }
        assert_eq!(dedup.watermark(&source_id), highest.get(&(source % 8)).copied());
    }
});
