//! Version stamp for `--version`: source revision plus build day.
//!
//! Packagers building outside a checkout set `AMP_CONTROL_REVISION`.

use std::process::Command;

use time::OffsetDateTime;

const REVISION_ENV: &str = "AMP_CONTROL_REVISION";

fn main() {
    println!("cargo:rerun-if-env-changed={REVISION_ENV}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let revision = std::env::var(REVISION_ENV)
        .ok()
        .filter(|r| !r.trim().is_empty())
        .or_else(describe_checkout)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=AMP_REVISION={}", revision.trim());
    println!("cargo:rustc-env=AMP_BUILD_DAY={}", build_day());
}

fn describe_checkout() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let described = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!described.is_empty()).then_some(described)
}

fn build_day() -> String {
    let stamp = match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(raw) => raw
            .parse::<i64>()
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()),
        Err(_) => Some(OffsetDateTime::now_utc()),
    };
    let Some(stamp) = stamp else {
        return "unknown-date".to_string();
    };
    time::format_description::parse("[year]-[month]-[day]")
        .ok()
        .and_then(|fmt| stamp.format(&fmt).ok())
        .unwrap_or_else(|| "unknown-date".to_string())
}
