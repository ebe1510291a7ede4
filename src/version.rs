/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Abbreviated git revision of the build, "unknown" outside a checkout
pub fn git_hash() -> &'static str {
    option_env!("NODEVIEW_GIT_HASH").unwrap_or("unknown")
}

/// UTC date of the build, "unknown" when the build script did not run
pub fn build_date() -> &'static str {
    option_env!("NODEVIEW_BUILD_DATE").unwrap_or("unknown")
}

/// e.g. `0.3.0 (commit a1b2c3d4, built 2026-10-16)`
pub fn version_string() -> String {
    format!("{} (commit {}, built {})", VERSION, git_hash(), build_date())
}
