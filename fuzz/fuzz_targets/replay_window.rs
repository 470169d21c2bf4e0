//! Fuzz target for the sliding replay window
//!
//! A counter accepted once must never be accepted again, whatever order
//! counters arrive in.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;
use wisp_crypto::replay::ReplayProtection;

#[derive(Debug, Arbitrary)]
enum Op {
    Check(u64),
    Accept(u64),
    Jump(u16),
}

fuzz_target!(|ops: Vec<Op>| {
    let mut window = ReplayProtection::new();
    let mut accepted = HashSet::new();
    let mut base = 0u64;

    for op in ops {
        match op {
            Op::Check(counter) => {
                let counter = base.saturating_add(counter % 20_000);
                if accepted.contains(&counter) {
                    assert!(!window.check(counter));
                }
            }
            Op::Accept(counter) => {
                let counter = base.saturating_add(counter % 20_000);
                let probed = window.check(counter);
                let taken = window.check_and_update(counter);
                assert_eq!(probed, taken);
                if taken {
                    assert!(accepted.insert(counter));
                }
            }
            Op::Jump(step) => base = base.saturating_add(u64::from(step) * 64),
        }
    }
});
