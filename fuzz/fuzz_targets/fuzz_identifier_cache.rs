//! Fuzz target for the identifier cache.
//!
//! Interleaves lookups, residency checks and revocations and checks that the cache
//! stays within capacity and never returns a value the resolver would not.

#![no_main]

use graphdb_proxy::{EntityKind, IdentifierCache, ProxyError};
use libfuzzer_sys::fuzz_target;
use std::num::NonZeroUsize;

fuzz_target!(|data: (u8, Vec<(u8, u8)>)| {
    let (capacity, ops) = data;
    let Some(capacity) = NonZeroUsize::new(usize::from(capacity % 16)) else {
        return;
    };

    let cache = IdentifierCache::new("fuzz", capacity, |key: &u8| -> graphdb_proxy::Result<u16> {
        if key % 5 == 0 {
            Err(ProxyError::lookup(EntityKind::Node, key.to_string()))
        } else {
            Ok(u16::from(*key) + 1)
        }
    });

    for (op, key) in ops {
        match op % 3 {
            0 => match cache.get(&key) {
                Ok(value) => {
                    assert_eq!(value, u16::from(key) + 1);
                    assert!(cache.has(&key));
                }
                Err(_) => assert!(!cache.has(&key)),
            },
            1 => {
                let _ = cache.has(&key);
            }
            _ => {
                cache.revoke_key(&key);
                assert!(!cache.has(&key));
            }
        }
        assert!(cache.len() <= capacity.get());
    }
});
