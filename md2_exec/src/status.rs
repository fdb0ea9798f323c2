//! The `statusReport` KV entry: a severity code plus human-readable text,
//! written by every command at entry, progress, and exit. Severity 0 is
//! normal, 1 is failure; intermediate values mark progress.

use md2_kv::KvHandle;

pub const SEVERITY_NORMAL: u8 = 0;
pub const SEVERITY_FAILURE: u8 = 1;
pub const SEVERITY_PROGRESS: u8 = 50;

pub fn report(kv: &dyn KvHandle, severity: u8, text: &str) {
    let _ = kv.setstr("statusReport", &format!("{severity}|{text}"));
}

pub fn report_error(kv: &dyn KvHandle, err: &impl std::fmt::Display) {
    report(kv, SEVERITY_FAILURE, &err.to_string());
}

pub fn set_phase(kv: &dyn KvHandle, phase: &str) {
    let _ = kv.setstr("phase", phase);
}
