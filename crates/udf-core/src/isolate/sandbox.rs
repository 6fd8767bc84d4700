//! Sandbox policy hook.
//!
//! The engine does not define sandbox rules. It installs whatever policy the
//! caller injects inside the isolated child, before any UDF code runs, and
//! refuses to call the UDF if installation fails.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A restriction installed in the UDF process before the UDF is called.
pub trait SandboxPolicy: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "custom"
    }

    /// Install the policy in the current process.
    ///
    /// Runs in the forked child. An `Err` aborts the run without calling
    /// into the UDF.
    fn install(&self, ctx: &SandboxContext) -> Result<(), String>;
}

impl<F> SandboxPolicy for F
where
    F: Fn(&SandboxContext) -> Result<(), String> + Send + Sync,
{
    fn install(&self, ctx: &SandboxContext) -> Result<(), String> {
        self(ctx)
    }
}

/// Sets `PR_SET_NO_NEW_PRIVS`, so the UDF process can never gain privileges
/// through `execve` (setuid binaries, file capabilities).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNewPrivileges;

impl SandboxPolicy for NoNewPrivileges {
    fn name(&self) -> &str {
        "no-new-privs"
    }

    #[cfg(target_os = "linux")]
    fn install(&self, _ctx: &SandboxContext) -> Result<(), String> {
        // SAFETY: prctl with integer arguments only.
        let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        if rc == 0 {
            Ok(())
        } else {
            Err(format!(
                "prctl(PR_SET_NO_NEW_PRIVS) failed: {}",
                std::io::Error::last_os_error()
            ))
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn install(&self, _ctx: &SandboxContext) -> Result<(), String> {
        Err("PR_SET_NO_NEW_PRIVS is only available on Linux".to_string())
    }
}

/// Per-run sandbox settings handed to a backend's `run`.
#[derive(Clone, Default)]
pub struct SandboxContext {
    /// Path identifying the caller (the filter plugin that hosts the engine).
    /// Passed to the UDF's `init` callback.
    filter_path: PathBuf,

    /// Policy installed in the child, if any.
    policy: Option<Arc<dyn SandboxPolicy>>,
}

impl SandboxContext {
    /// Create a context without a sandbox policy.
    pub fn new(filter_path: impl Into<PathBuf>) -> Self {
        Self {
            filter_path: filter_path.into(),
            policy: None,
        }
    }

    /// Attach a policy.
    pub fn with_policy(mut self, policy: impl SandboxPolicy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Path passed to the UDF's `init` callback.
    pub fn filter_path(&self) -> &Path {
        &self.filter_path
    }

    /// Whether a policy is configured.
    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }

    /// Install the configured policy, if any.
    ///
    /// Returns the go/no-go decision for calling into the UDF.
    pub fn install(&self) -> Result<(), String> {
        match &self.policy {
            Some(policy) => policy
                .install(self)
                .map_err(|e| format!("{}: {}", policy.name(), e)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for SandboxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxContext")
            .field("filter_path", &self.filter_path)
            .field("policy", &self.policy.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_policy_is_go() {
        let ctx = SandboxContext::new("/usr/lib/filter.so");
        assert!(!ctx.has_policy());
        assert!(ctx.install().is_ok());
        assert_eq!(ctx.filter_path(), Path::new("/usr/lib/filter.so"));
    }

    #[test]
    fn test_closure_policy() {
        let ctx = SandboxContext::new("f.so").with_policy(|ctx: &SandboxContext| {
            if ctx.filter_path().ends_with("f.so") {
                Err("denied".to_string())
            } else {
                Ok(())
            }
        });
        assert_eq!(ctx.install().unwrap_err(), "custom: denied");
    }

    #[test]
    fn test_debug_names_policy() {
        let ctx = SandboxContext::new("f.so").with_policy(NoNewPrivileges);
        let rendered = format!("{:?}", ctx);
        assert!(rendered.contains("no-new-privs"));
    }
}
