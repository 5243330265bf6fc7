//! Step 1 of the pipeline: turn the raw blob-added payload into a [`Report`].
//!
//! Most agents post an already-structured payload (`crash_type`/`crash_site`/
//! `call_stack` extracted by the task's own stack-trace parser, out of scope
//! here). Some post only a raw sanitizer log; those are parsed with a small
//! best-effort ASan scanner rather than a full symbolizer.

use chrono::Utc;
use onefuzz_core::ids::{JobId, TaskId};
use onefuzz_core::report::Report;
use serde::Deserialize;

#[derive(Deserialize)]
struct RawReport {
    task_id: TaskId,
    job_id: JobId,
    input_blob: String,
    executable: String,
    #[serde(default)]
    crash_type: Option<String>,
    #[serde(default)]
    crash_site: Option<String>,
    #[serde(default)]
    call_stack: Option<Vec<String>>,
    #[serde(default)]
    asan_log: Option<String>,
    #[serde(default)]
    scariness_score: Option<i32>,
    #[serde(default)]
    scariness_description: Option<String>,
}

/// A payload that can't be attributed to a task/job at all: there's no
/// record to append a `TaskEvent` to, so the caller has nothing to do but
/// log and drop it.
#[derive(Debug, thiserror::Error)]
#[error("crash report payload is missing task_id/job_id: {0}")]
pub struct UnattributableReport(pub serde_json::Error);

/// Parse a blob-added payload into a [`Report`] with its minimization fields
/// left empty -- the caller fills those in via [`crate::minimize`].
///
/// Never fails once `task_id`/`job_id` are present: a payload with no
/// structured crash fields and an unparseable (or absent) `asan_log` still
/// produces a `Report`, demoted to [`Report::UNPARSEABLE`].
pub fn parse_report(raw: serde_json::Value) -> Result<Report, UnattributableReport> {
    let raw: RawReport = serde_json::from_value(raw.clone())
        .or_else(|_| parse_minimal(&raw))
        .map_err(UnattributableReport)?;

    let (crash_type, crash_site, call_stack) =
        match (raw.crash_type, raw.crash_site, raw.call_stack) {
            (Some(t), Some(s), Some(stack)) => (t, s, stack),
            _ => match raw.asan_log.as_deref().and_then(parse_asan_log) {
                Some(parsed) => parsed,
                None => (Report::UNPARSEABLE.to_string(), String::new(), Vec::new()),
            },
        };

    Ok(Report {
        task_id: raw.task_id,
        job_id: raw.job_id,
        input_blob: raw.input_blob,
        executable: raw.executable,
        crash_type,
        crash_site,
        call_stack,
        asan_log: raw.asan_log,
        scariness_score: raw.scariness_score,
        scariness_description: raw.scariness_description,
        minimized_stack: Vec::new(),
        minimized_stack_sha256: String::new(),
        minimized_stack_function_lines: Vec::new(),
        minimized_stack_function_lines_sha256: String::new(),
        created_at: Utc::now(),
    })
}

/// Fallback for a payload that failed full deserialization (e.g. `call_stack`
/// present but not an array of strings): try to recover just enough to
/// attribute the report to a task/job.
fn parse_minimal(raw: &serde_json::Value) -> Result<RawReport, serde_json::Error> {
    #[derive(Deserialize)]
    struct Minimal {
        task_id: TaskId,
        job_id: JobId,
        #[serde(default)]
        input_blob: String,
        #[serde(default)]
        executable: String,
        #[serde(default)]
        asan_log: Option<String>,
    }

    let minimal: Minimal = serde_json::from_value(raw.clone())?;
    Ok(RawReport {
        task_id: minimal.task_id,
        job_id: minimal.job_id,
        input_blob: minimal.input_blob,
        executable: minimal.executable,
        crash_type: None,
        crash_site: None,
        call_stack: None,
        asan_log: minimal.asan_log,
        scariness_score: None,
        scariness_description: None,
    })
}

/// A deliberately small ASan scanner: find the `ERROR: ...Sanitizer:` line
/// for `crash_type`, and every `#N ...` frame line for the call stack. Bytes
/// that aren't valid UTF-8 are already lossily transcoded by the caller that
/// read the log off the wire, per the failure policy for best-effort
/// transcoding.
fn parse_asan_log(log: &str) -> Option<(String, String, Vec<String>)> {
    let crash_type = log
        .lines()
        .find_map(|line| line.split_once("Sanitizer: "))
        .map(|(_, rest)| rest.split_whitespace().next().unwrap_or("unknown").to_string())?;

    let call_stack: Vec<String> = log
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed.starts_with('#')
                && trimmed[1..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit())
        })
        .map(|line| {
            let trimmed = line.trim_start();
            trimmed
                .split_once(' ')
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or_default()
        })
        .collect();

    if call_stack.is_empty() {
        return None;
    }

    let crash_site = call_stack[0].clone();
    Some((crash_type, crash_site, call_stack))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_structured_payload() {
        let raw = serde_json::json!({
            "task_id": TaskId::new(),
            "job_id": JobId::new(),
            "input_blob": "crashes/input-1",
            "executable": "fuzz_target",
            "crash_type": "heap-buffer-overflow",
            "crash_site": "foo_bar+0x10",
            "call_stack": ["foo_bar+0x10", "main+0x20"],
        });

        let report = parse_report(raw).unwrap();
        assert_eq!(report.crash_type, "heap-buffer-overflow");
        assert_eq!(report.call_stack.len(), 2);
    }

    #[test]
    fn recovers_structured_fields_from_an_asan_log() {
        let raw = serde_json::json!({
            "task_id": TaskId::new(),
            "job_id": JobId::new(),
            "input_blob": "crashes/input-2",
            "executable": "fuzz_target",
            "asan_log": "==1==ERROR: AddressSanitizer: heap-buffer-overflow\n    #0 0x555 in foo_bar fuzz.c:10:3\n    #1 0x556 in main fuzz.c:20:1\n",
        });

        let report = parse_report(raw).unwrap();
        assert_eq!(report.crash_type, "heap-buffer-overflow");
        assert_eq!(report.call_stack.len(), 2);
        assert!(!report.is_unparseable());
    }

    #[test]
    fn demotes_an_unparseable_log_without_failing() {
        let raw = serde_json::json!({
            "task_id": TaskId::new(),
            "job_id": JobId::new(),
            "input_blob": "crashes/input-3",
            "executable": "fuzz_target",
            "asan_log": "not a sanitizer log at all",
        });

        let report = parse_report(raw).unwrap();
        assert!(report.is_unparseable());
        assert!(report.call_stack.is_empty());
    }

    #[test]
    fn rejects_a_payload_with_no_task_or_job() {
        let raw = serde_json::json!({ "input_blob": "crashes/input-4" });
        assert!(parse_report(raw).is_err());
    }
}
