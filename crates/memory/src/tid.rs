use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Length of a record key: enough base36 digits to hold microsecond
/// timestamps far past any plausible deployment horizon.
const TID_LEN: usize = 14;

static LAST: AtomicU64 = AtomicU64::new(0);

/// Mint a sortable-time record key: 14 lowercase base36 chars derived from
/// the current microsecond timestamp. A process-wide monotonic guard keeps
/// same-microsecond mints unique and ordered.
pub fn next_tid() -> String {
    let now = Utc::now().timestamp_micros().max(0) as u64;
    let mut prev = LAST.load(Ordering::Relaxed);
    let value = loop {
        let candidate = now.max(prev + 1);
        match LAST.compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break candidate,
            Err(actual) => prev = actual,
        }
    };
    encode_base36(value)
}

fn encode_base36(mut value: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = [b'0'; TID_LEN];
    let mut i = TID_LEN;
    while value > 0 && i > 0 {
        i -= 1;
        out[i] = ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tids_are_fixed_width_and_monotonic() {
        let a = next_tid();
        let b = next_tid();
        let c = next_tid();
        assert_eq!(a.len(), 14);
        assert_eq!(b.len(), 14);
        assert!(a < b, "{a} !< {b}");
        assert!(b < c, "{b} !< {c}");
    }

    #[test]
    fn base36_encoding_is_sortable() {
        assert!(encode_base36(1) < encode_base36(36));
        assert!(encode_base36(36) < encode_base36(1_000_000));
        assert_eq!(encode_base36(35), "0000000000000z");
    }
}
