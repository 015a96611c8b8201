use std::env;
use std::process::Command;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Short revision of the checkout, suffixed with `-dirty` for local edits.
fn revision() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let rev = String::from_utf8(out.stdout).ok()?.trim().to_string();
    (!rev.is_empty()).then_some(rev)
}

/// Build time, pinned by `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_time() -> OffsetDateTime {
    env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
}

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");

    let rev = revision().unwrap_or_else(|| "unknown".to_string());
    let date = build_time()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=ALBUM_DECK_GIT_SHA={rev}");
    println!("cargo:rustc-env=ALBUM_DECK_BUILD_DATE={date}");
}
