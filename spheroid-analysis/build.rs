//! Stamps the binary with the commit and build time shown by `--version`

use std::env;
use std::process::Command;

/// Trimmed stdout of a git command, or `None` outside a checkout
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_owned()).filter(|s| !s.is_empty())
}

fn main() {
    let commit = match (git(&["rev-parse", "--short=8", "HEAD"]), git(&["status", "--porcelain"])) {
        (Some(hash), Some(changes)) if !changes.is_empty() => format!("{}-dirty", hash),
        (Some(hash), _) => hash,
        (None, _) => "unknown".to_owned(),
    };
    let built_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_owned());

    for (key, value) in [
        ("GIT_HASH", commit),
        ("BUILD_TIMESTAMP", built_at.to_string()),
        ("BUILD_PROFILE", profile),
    ] {
        println!("cargo:rustc-env={}={}", key, value);
    }
    println!("cargo:rerun-if-changed=../.git/HEAD");
    println!("cargo:rerun-if-changed=../.git/index");
}
