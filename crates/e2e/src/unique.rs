//! Timestamp-derived values for unique test data

use std::sync::atomic::{AtomicI64, Ordering};

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Current time in milliseconds, bumped past the previous stamp when two
/// calls land in the same millisecond. Strictly increasing per process.
pub fn stamp() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// `test<stamp>@example.com`
pub fn email() -> String {
    email_for(stamp())
}

pub(crate) fn email_for(stamp: i64) -> String {
    format!("test{}@example.com", stamp)
}

/// Lower-case `name`, turn whitespace runs into `-` and drop anything
/// outside `[a-z0-9-]`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut in_space = false;
    for c in name.to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_space {
                slug.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            slug.push(c);
        }
    }
    slug
}
