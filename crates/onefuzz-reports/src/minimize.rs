//! Steps 2-3 of the pipeline: denylist-filtered call stack minimization and
//! the SHA-256 fingerprint pair.

use onefuzz_core::report::Report;
use sha2::{Digest, Sha256};

/// Frame-name substrings dropped from a call stack before it's used for
/// deduplication: sanitizer runtime internals, the libc allocator entry
/// points every ASan/MSan/UBSan crash passes through, and the sanitizer's
/// own argument-forwarding trampolines. None of these distinguish one crash
/// from another, so keeping them would fragment identical bugs into
/// different fingerprints across unrelated allocation call sites.
const DENYLIST: &[&str] = &[
    "__asan_",
    "__msan_",
    "__ubsan_",
    "__sanitizer_",
    "__interceptor_",
    "__asan::",
    "_doarg",
    "RunWithArgs",
    "malloc",
    "free",
    "operator new",
    "operator delete",
];

fn is_denied(frame: &str) -> bool {
    DENYLIST.iter().any(|pattern| frame.contains(pattern))
}

/// A `function:offset` token for one retained frame, or `None` if the frame
/// carries no function name -- an empty token would collide across
/// unrelated crashes, so such frames are dropped rather than kept.
fn function_line(frame: &str) -> Option<String> {
    let frame = frame.trim();
    if frame.is_empty() {
        return None;
    }

    let (function, offset) = match frame.split_once('+') {
        Some((function, offset)) => (function.trim(), offset.trim()),
        None => (frame, "0x0"),
    };

    if function.is_empty() {
        return None;
    }

    Some(format!("{function}:{offset}"))
}

fn sha256_of<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Fill in `report`'s minimized-stack and fingerprint fields from its raw
/// `call_stack`, capping the retained frame count at `max_depth`.
pub fn minimize(report: &mut Report, max_depth: usize) {
    let minimized: Vec<String> = report
        .call_stack
        .iter()
        .filter(|frame| !is_denied(frame))
        .take(max_depth.max(1))
        .cloned()
        .collect();

    let function_lines: Vec<String> = minimized.iter().filter_map(|f| function_line(f)).collect();

    report.minimized_stack_sha256 =
        sha256_of(minimized.iter().map(String::as_str));
    report.minimized_stack_function_lines_sha256 =
        sha256_of(function_lines.iter().map(String::as_str));
    report.minimized_stack = minimized;
    report.minimized_stack_function_lines = function_lines;
}
