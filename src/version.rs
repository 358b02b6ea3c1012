//! Build and version metadata.
//!
//! Populated once by [`init`] at process start from compile-time environment
//! (`BUILD_REVISION`, `BUILD_BRANCH`, `BUILD_USER`, `BUILD_DATE`), read-only
//! afterwards.

use serde::Serialize;
use std::sync::OnceLock;

const UNKNOWN: &str = "(unknown)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub revision: &'static str,
    pub branch: &'static str,
    pub build_user: &'static str,
    pub build_date: &'static str,
}

/// Placeholder reported before [`init`] runs.
static DEV: BuildInfo = BuildInfo {
    version: "dev",
    revision: UNKNOWN,
    branch: UNKNOWN,
    build_user: UNKNOWN,
    build_date: UNKNOWN,
};

static INFO: OnceLock<BuildInfo> = OnceLock::new();

impl BuildInfo {
    fn from_build_env() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            revision: option_env!("BUILD_REVISION").unwrap_or(UNKNOWN),
            branch: option_env!("BUILD_BRANCH").unwrap_or(UNKNOWN),
            build_user: option_env!("BUILD_USER").unwrap_or(UNKNOWN),
            build_date: option_env!("BUILD_DATE").unwrap_or(UNKNOWN),
        }
    }
}

/// Populate the build info. Later calls return the stored value.
pub fn init() -> &'static BuildInfo {
    INFO.get_or_init(BuildInfo::from_build_env)
}

/// The build info, or the `dev` placeholder if [`init`] was never called.
pub fn info() -> &'static BuildInfo {
    INFO.get().unwrap_or(&DEV)
}
