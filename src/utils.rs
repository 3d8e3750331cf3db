use std::time::{SystemTime, UNIX_EPOCH};

pub fn hash_64(key: u64) -> u64 {
    let mut key = key;
    key = key.wrapping_add(!key.wrapping_shl(32));
    key ^= key.wrapping_shr(22);
    key = key.wrapping_add(!key.wrapping_shl(13));
    key ^= key.wrapping_shr(8);
    key = key.wrapping_add(key.wrapping_shl(3));
    key ^= key.wrapping_shr(15);
    key = key.wrapping_add(!key.wrapping_shl(27));
    key ^= key.wrapping_shr(31);
    key
}

pub const FINGERPRINT_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Fold one more value into a running fingerprint.
#[inline]
pub fn fingerprint_step(acc: u64, value: u64) -> u64 {
    hash_64(acc.rotate_left(5) ^ value)
}

/// Order-sensitive fold of a sequence of values into one 64-bit fingerprint.
pub fn fingerprint(values: impl IntoIterator<Item = u64>) -> u64 {
    values.into_iter().fold(FINGERPRINT_SEED, fingerprint_step)
}

pub fn realtime() -> f64 {
    let now = SystemTime::now();
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn cputime() -> f64 {
    let rusage = unsafe {
        let mut rusage = std::mem::MaybeUninit::uninit();
        libc::getrusage(libc::RUSAGE_SELF, rusage.as_mut_ptr());
        rusage.assume_init()
    };
    let user_time = rusage.ru_utime;
    let sys_time = rusage.ru_stime;
    (user_time.tv_sec as f64 + user_time.tv_usec as f64 * 1e-6)
        + (sys_time.tv_sec as f64 + sys_time.tv_usec as f64 * 1e-6)
}
