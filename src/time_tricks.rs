use std::time::SystemTime;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

// A constant "beginning of time" in both Instant and SystemTime. All time in
// this crate is driven by the caller's `Instant`, but cookie buckets should
// line up with wall clock boundaries, which Instant can't express.
static BEGINNING_OF_TIME: Lazy<(Instant, SystemTime)> = Lazy::new(|| {
    let now = Instant::now();
    let now_sys = SystemTime::now();

    // Find an Instant in the past which is up to an hour back.
    let beginning_of_time = {
        let mut secs = 3600;
        loop {
            let dur = Duration::from_secs(secs);
            if let Some(v) = now.checked_sub(dur) {
                break v;
            }
            secs -= 1;
            if secs == 0 {
                break now;
            }
        }
    };

    // This might be less than 1 hour if the machine uptime is less.
    let since_beginning_of_time = now - beginning_of_time;

    (beginning_of_time, now_sys - since_beginning_of_time)
});

pub trait InstantExt {
    /// Convert an Instant to a Duration since the unix epoch.
    fn to_unix_duration(&self) -> Duration;

    /// Index of the wall clock bucket of width `granularity` this Instant falls in.
    fn bucket(&self, granularity: Duration) -> u64;
}

impl InstantExt for Instant {
    fn to_unix_duration(&self) -> Duration {
        if *self < BEGINNING_OF_TIME.0 {
            warn!("Time went backwards from beginning_of_time Instant");
        }

        // Saturates to zero for instants before the beginning of time.
        let duration_since_time_0 = self.saturating_duration_since(BEGINNING_OF_TIME.0);
        let system_time = BEGINNING_OF_TIME.1 + duration_since_time_0;

        system_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
    }

    fn bucket(&self, granularity: Duration) -> u64 {
        let secs = granularity.as_secs().max(1);
        self.to_unix_duration().as_secs() / secs
    }
}
