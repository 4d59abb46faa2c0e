/// `git describe` output, or the crate version outside a checkout.
pub const GIT_VERSION: &str = env!("GIT_VERSION");

pub const GIT_HASH: &str = env!("GIT_HASH");

/// UTC build date.
pub const BUILD_DATE: &str = env!("BUILD_DATE");

pub const BUILD_TARGET: &str = env!("BUILD_TARGET");

/// Shown by `--version`.
pub const VERSION: &str =
    concat!(env!("GIT_VERSION"), " (", env!("GIT_HASH"), ")");

pub fn startup_banner() -> String {
    format!(
        r#"
  _   _           __
 | |_(_) ___ _ __/ _| ___  _ __ __ _  ___
 | __| |/ _ \ '__| |_ / _ \| '__/ _` |/ _ \
 | |_| |  __/ |  |  _| (_) | | | (_| |  __/
  \__|_|\___|_|  |_|  \___/|_|  \__, |\___|
                                |___/

  Version:  {GIT_VERSION}
  Commit:   {GIT_HASH}
  Built:    {BUILD_DATE}
  Target:   {BUILD_TARGET}
"#
    )
}
