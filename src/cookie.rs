//! Stateless retry cookies.
//!
//! A cookie is `HMAC-SHA256(secret, peer_addr || bucket)` where `bucket` is
//! the wall clock time divided by [`Config::cookie_bucket`]. Validating one
//! needs nothing but the secret, so a server can demand a cookie echo before
//! it commits any per-peer state.

use std::fmt;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::rng::SecretRng;
use crate::time_tricks::InstantExt;
use crate::Config;

type HmacSha256 = Hmac<Sha256>;

/// Length of the cookies we issue.
pub const COOKIE_LEN: usize = 32;

/// Opaque cookie bytes as carried in a ClientHello or HelloVerifyRequest.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Cookie(ArrayVec<u8, COOKIE_LEN>);

impl Cookie {
    /// Wrap bytes received from the wire. `None` if longer than [`COOKIE_LEN`].
    pub fn try_new(bytes: &[u8]) -> Option<Self> {
        ArrayVec::try_from(bytes).ok().map(Cookie)
    }

    pub fn empty() -> Self {
        Cookie::default()
    }
}

impl Deref for Cookie {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie").field("len", &self.0.len()).finish()
    }
}

struct Secrets {
    current: Zeroizing<[u8; 32]>,
    /// Kept for one rotation so that cookies in flight survive it.
    previous: Option<Zeroizing<[u8; 32]>>,
    rotated_at: Instant,
    rng: SecretRng,
}

/// Issues and validates cookies.
///
/// One store is shared by every session of a server, usually as
/// `Arc<CookieStore>`. The secret sits behind a `RwLock` that is only
/// written on rotation.
pub struct CookieStore {
    bucket: Duration,
    rotation_interval: Duration,
    secrets: RwLock<Secrets>,
}

impl CookieStore {
    pub fn new(config: &Config, now: Instant) -> Self {
        let mut rng = SecretRng::new(config.rng_seed());
        let current = rng.secret();

        CookieStore {
            bucket: config.cookie_bucket(),
            rotation_interval: config.cookie_secret_rotation_interval(),
            secrets: RwLock::new(Secrets {
                current,
                previous: None,
                rotated_at: now,
                rng,
            }),
        }
    }

    /// Produce the cookie for `peer` at `now`.
    pub fn issue(&self, peer: SocketAddr, now: Instant) -> Cookie {
        self.rotate_if_due(now);

        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        let tag = compute(&secrets.current, peer, now.bucket(self.bucket));

        Cookie(ArrayVec::from(tag))
    }

    /// Check a cookie echoed by `peer`.
    ///
    /// Accepts cookies from the current and the previous time bucket, under
    /// the current or the previous secret. Anything else, including
    /// truncated input, fails.
    pub fn validate(&self, peer: SocketAddr, cookie: &[u8], now: Instant) -> bool {
        if cookie.len() != COOKIE_LEN {
            return false;
        }

        self.rotate_if_due(now);

        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
        let bucket = now.bucket(self.bucket);
        let buckets = [bucket, bucket.saturating_sub(1)];

        let keys = std::iter::once(&secrets.current).chain(secrets.previous.as_ref());

        for key in keys {
            for b in buckets {
                let expected = compute(key, peer, b);
                if bool::from(expected.as_slice().ct_eq(cookie)) {
                    return true;
                }
            }
        }

        false
    }

    /// Replace the secret now. The old one stays valid for one more rotation.
    pub fn rotate(&self, now: Instant) {
        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        Self::do_rotate(&mut secrets, now);
    }

    fn rotate_if_due(&self, now: Instant) {
        let due = {
            let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner);
            now >= secrets.rotated_at + self.rotation_interval
        };

        if !due {
            return;
        }

        let mut secrets = self.secrets.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have rotated while we waited for the write lock.
        if now >= secrets.rotated_at + self.rotation_interval {
            Self::do_rotate(&mut secrets, now);
        }
    }

    fn do_rotate(secrets: &mut Secrets, now: Instant) {
        debug!("Rotating cookie secret");
        let next = secrets.rng.secret();
        let old = std::mem::replace(&mut secrets.current, next);
        secrets.previous = Some(old);
        secrets.rotated_at = now;
    }
}

impl fmt::Debug for CookieStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieStore")
            .field("bucket", &self.bucket)
            .field("rotation_interval", &self.rotation_interval)
            .finish()
    }
}

fn compute(secret: &[u8; 32], peer: SocketAddr, bucket: u64) -> [u8; COOKIE_LEN] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");

    match peer {
        SocketAddr::V4(a) => {
            mac.update(&[4]);
            mac.update(&a.ip().octets());
        }
        SocketAddr::V6(a) => {
            mac.update(&[6]);
            mac.update(&a.ip().octets());
        }
    }
    mac.update(&peer.port().to_be_bytes());
    mac.update(&bucket.to_be_bytes());

    let mut out = [0u8; COOKIE_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}
