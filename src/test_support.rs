// Shared fixtures for integration tests and benches; included via
// `#[path = "../src/test_support.rs"]` so it never ships in the library.

use idlink_rs::{Fragment, IdentityEngine, ManualClock, MemoryStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

#[allow(dead_code)]
pub struct Fixture {
    pub engine: IdentityEngine,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

/// Engine over a manually driven clock, starting at t=1000ms.
#[allow(dead_code)]
pub fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::starting_at(1_000));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    Fixture {
        engine: IdentityEngine::new(Box::new(store.clone())),
        store,
        clock,
    }
}

#[allow(dead_code)]
pub fn fragment(email: Option<&str>, phone: Option<&str>) -> Fragment {
    Fragment::new(email, phone)
}

/// Seeded workload of overlapping fragments.
///
/// Draws emails and phones from small pools so that distinct requests
/// repeatedly hit the same clusters and trigger merges.
#[allow(dead_code)]
pub fn generate_fragments(
    count: usize,
    email_pool: usize,
    phone_pool: usize,
    seed: u64,
) -> Vec<Fragment> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fragments = Vec::with_capacity(count);

    for _ in 0..count {
        let email = if rng.random_bool(0.7) {
            Some(format!("user{}@example.com", rng.random_range(0..email_pool)))
        } else {
            None
        };
        let phone = if email.is_none() || rng.random_bool(0.7) {
            Some(format!("555{:04}", rng.random_range(0..phone_pool)))
        } else {
            None
        };
        fragments.push(Fragment {
            email,
            phone_number: phone,
        });
    }

    fragments
}
