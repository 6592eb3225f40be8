//! Seedable source of cookie secrets.
//!
//! When a seed is provided via [`Config::rng_seed`](crate::ConfigBuilder::rng_seed)
//! the secrets are deterministic, which is only useful for tests. Without a
//! seed the thread-local CSPRNG is used.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zeroize::Zeroizing;

pub(crate) struct SecretRng {
    inner: Option<StdRng>,
}

impl SecretRng {
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    /// A fresh 32-byte secret, wiped from memory when dropped.
    pub fn secret(&mut self) -> Zeroizing<[u8; 32]> {
        let mut out = Zeroizing::new([0u8; 32]);
        match self.inner.as_mut() {
            Some(rng) => rng.fill(&mut out[..]),
            None => rand::rng().fill(&mut out[..]),
        }
        out
    }
}

impl std::fmt::Debug for SecretRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}
