//! The `{field.path}` substitution engine used to render ADO/GitHub/Teams
//! templates against a report.
//!
//! Deliberately minimal: no conditionals, no loops, just token lookup
//! against a flattened JSON context. Templates only need to interpolate a
//! handful of scalar fields into a title/body/fields map, and a richer
//! engine would be one more untested surface for something this narrow.

use std::collections::BTreeMap;

use onefuzz_core::job::Job;
use onefuzz_core::report::Report;
use onefuzz_core::task::Task;
use serde_json::Value;

/// A flattened `field.path -> string` context built from a report and its
/// owning task/job, plus the three scalar conveniences every template may
/// reference.
pub struct Context(BTreeMap<String, String>);

impl Context {
    pub fn build(report: &Report, task: &Task, job: &Job, urls: &ReportUrls) -> Self {
        let mut flat = BTreeMap::new();
        flatten("report", &serde_json::to_value(report).unwrap_or(Value::Null), &mut flat);
        flatten("task", &serde_json::to_value(task).unwrap_or(Value::Null), &mut flat);
        flatten("job", &serde_json::to_value(job).unwrap_or(Value::Null), &mut flat);
        flat.insert("target_url".to_string(), urls.target_url.clone());
        flat.insert("input_url".to_string(), urls.input_url.clone());
        flat.insert("report_url".to_string(), urls.report_url.clone());
        Self(flat)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }
}

#[cfg(test)]
impl Context {
    pub(crate) fn from_entries(entries: &[(&str, &str)]) -> Self {
        Self(entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }
}

/// Blob URLs a template may reference. Resolving an actual URL scheme (SAS
/// token, public endpoint, ...) is a cloud-storage concern out of scope
/// here; callers pass already-resolved URLs in.
#[derive(Default)]
pub struct ReportUrls {
    pub target_url: String,
    pub input_url: String,
    pub report_url: String,
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                flatten(&format!("{prefix}.{key}"), value, out);
            }
        }
        Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten(&format!("{prefix}.{index}"), value, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Null => (),
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Translate a template written in the legacy double-brace dialect
/// (`{{ report.crash_type }}`) into the current `{report.crash_type}` form.
///
/// Idempotent: already-current templates pass through untouched, and a
/// translated template contains no `{{` for a second pass to rewrite. A
/// malformed legacy template (unterminated `{{`) is returned as written
/// rather than half-rewritten, so whatever it contains is never partially
/// substituted.
pub fn translate_legacy(template: &str) -> std::borrow::Cow<'_, str> {
    if !template.contains("{{") {
        return std::borrow::Cow::Borrowed(template);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        rest = &rest[start + 2..];

        match rest.find("}}") {
            Some(end) => {
                out.push('{');
                out.push_str(rest[..end].trim());
                out.push('}');
                rest = &rest[end + 2..];
            }
            None => return std::borrow::Cow::Borrowed(template),
        }
    }

    out.push_str(rest);
    std::borrow::Cow::Owned(out)
}

/// Render a `{field.path}` template. An unresolvable token renders as an
/// empty string rather than failing the whole render -- one missing field
/// (e.g. an `asan_log` that was never set) shouldn't block delivery of an
/// otherwise-complete notification.
pub fn render(template: &str, ctx: &Context) -> String {
    let template = translate_legacy(template);
    let mut out = String::with_capacity(template.len());
    let mut rest = &*template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        rest = &rest[start + 1..];

        match rest.find('}') {
            Some(end) => {
                let token = &rest[..end];
                out.push_str(ctx.get(token).unwrap_or(""));
                rest = &rest[end + 1..];
            }
            None => {
                out.push('{');
                break;
            }
        }
    }

    out.push_str(rest);
    out
}
