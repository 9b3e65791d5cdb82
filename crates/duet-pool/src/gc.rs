//! Memory-pressure GC hint (see DESIGN.md for the design rationale). Rust
//! has no generational collector to hint at, so this reads
//! real resident-set size on Linux and, if it is over
//! `memory_threshold_for_gc`, asks glibc to return freed heap pages to the
//! OS via `libc::malloc_trim`.

/// Resident set size in bytes, or `None` if it can't be determined on this
/// platform.
#[cfg(target_os = "linux")]
pub fn resident_set_size() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = contents.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(rss_pages * page_size as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn resident_set_size() -> Option<u64> {
    None
}

/// Check RSS against `threshold_bytes`; if over, log and ask the
/// allocator to trim. Returns whether a trim was attempted.
pub fn maybe_trim(threshold_bytes: u64) -> bool {
    let Some(rss) = resident_set_size() else {
        return false;
    };
    if rss < threshold_bytes {
        return false;
    }
    tracing::debug!(rss_bytes = rss, threshold_bytes, "gc hint: trimming heap");
    trim_heap();
    true
}

#[cfg(target_os = "linux")]
fn trim_heap() {
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(target_os = "linux"))]
fn trim_heap() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maybe_trim_is_a_noop_under_threshold() {
        assert!(!maybe_trim(u64::MAX));
    }
}
