//! Privilege state machine: init, drop, and scoped escalation.
//!
//! The process runs as the invoking user everywhere except inside a
//! [`PrivilegeGuard`] scope, which spans exactly one privileged syscall
//! sequence (mount, unmount, chroot, filesystem format, namespace
//! unshare). The guard restores the prior identity on every exit path,
//! including early error returns.

use std::path::Path;

use nix::unistd::{Gid, Uid, getegid, geteuid, getgid, getuid, setegid, seteuid};
use vessel_common::config::SystemConfig;
use vessel_common::constants;
use vessel_common::error::{Result, VesselError};

/// Identity values captured at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentitySnapshot {
    /// Real (invoking) user ID.
    pub real_uid: Uid,
    /// Real (invoking) group ID.
    pub real_gid: Gid,
    /// Effective user ID at capture time.
    pub effective_uid: Uid,
    /// Effective group ID at capture time.
    pub effective_gid: Gid,
}

impl IdentitySnapshot {
    /// Captures the calling process's current identity.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            real_uid: getuid(),
            real_gid: getgid(),
            effective_uid: geteuid(),
            effective_gid: getegid(),
        }
    }
}

/// Result of the one-time startup policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Whether the binary is running in privileged-install (SUID) mode.
    pub suid_binary: bool,
    /// Whether escalation is permitted for this invocation.
    pub escalation_allowed: bool,
}

/// Evaluates the escalation policy gate from an identity snapshot.
///
/// The checks run once at startup and their result is cached for the
/// invocation. Privileged-install mode is detected as an effective-root,
/// real-non-root identity combination.
///
/// # Errors
///
/// Returns an error if the administrator has disabled SUID operation or
/// the user requested non-privileged mode while running the privileged
/// binary.
pub fn evaluate_policy(
    ids: IdentitySnapshot,
    allow_setuid: bool,
    nosuid_requested: bool,
) -> Result<PolicyDecision> {
    let suid_binary = ids.effective_uid.is_root() && !ids.real_uid.is_root();

    if suid_binary {
        if !allow_setuid {
            return Err(VesselError::Privilege {
                message: "SUID mode has been disabled by the administrator".into(),
            });
        }
        if nosuid_requested {
            return Err(VesselError::NosuidRequested {
                message: format!("{} is set", constants::env::NOSUID),
            });
        }
    }

    Ok(PolicyDecision {
        suid_binary,
        escalation_allowed: suid_binary || ids.real_uid.is_root(),
    })
}

/// The process-wide privilege state.
///
/// Created exactly once per process by [`PrivilegeSet::init`], mutated
/// only through [`drop_privileges`](PrivilegeSet::drop_privileges) and
/// [`escalate`](PrivilegeSet::escalate), and never shared across
/// processes.
#[derive(Debug)]
pub struct PrivilegeSet {
    ids: IdentitySnapshot,
    policy: PolicyDecision,
    dropped: bool,
    escalated: bool,
}

impl PrivilegeSet {
    /// Captures the process identity and evaluates the escalation policy.
    ///
    /// In privileged-install mode the binary at `/proc/self/exe` must be
    /// a root-owned SUID executable and `config_path`, when given, must
    /// be root-owned — an untrusted configuration must never gate
    /// privileged operation.
    ///
    /// # Errors
    ///
    /// Returns an error on any violated install precondition or a denied
    /// policy gate. Callers treat every error from this function as fatal.
    pub fn init(config: &SystemConfig, config_path: Option<&Path>) -> Result<Self> {
        let ids = IdentitySnapshot::capture();
        let nosuid_requested = std::env::var_os(constants::env::NOSUID).is_some();
        let policy = evaluate_policy(ids, config.allow_setuid, nosuid_requested)?;

        if policy.suid_binary {
            verify_suid_binary()?;
            if let Some(path) = config_path {
                if !vessel_common::config::is_root_owned(path)? {
                    return Err(VesselError::Privilege {
                        message: format!(
                            "running in privileged mode, root must own {}",
                            path.display()
                        ),
                    });
                }
            }
        }

        tracing::debug!(
            real_uid = ids.real_uid.as_raw(),
            effective_uid = ids.effective_uid.as_raw(),
            suid_binary = policy.suid_binary,
            escalation_allowed = policy.escalation_allowed,
            "privilege state initialized"
        );

        Ok(Self {
            ids,
            policy,
            dropped: false,
            escalated: false,
        })
    }

    /// Sets the effective identity back to the real (invoking) user.
    ///
    /// Must run before any user-influenced code path executes.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity change is rejected by the kernel.
    pub fn drop_privileges(&mut self) -> Result<()> {
        // Group first: lowering the uid first would forfeit the right to
        // change the gid.
        setegid(self.ids.real_gid).map_err(|e| VesselError::Privilege {
            message: format!("could not drop effective gid: {e}"),
        })?;
        seteuid(self.ids.real_uid).map_err(|e| VesselError::Privilege {
            message: format!("could not drop effective uid: {e}"),
        })?;
        self.dropped = true;
        self.escalated = false;
        tracing::debug!(uid = self.ids.real_uid.as_raw(), "privileges dropped");
        Ok(())
    }

    /// Temporarily raises the effective identity to root.
    ///
    /// Returns a guard whose `Drop` restores the invoking user's identity.
    /// The guard mutably borrows this set, so no other privilege-sensitive
    /// operation can run while the scope is open.
    ///
    /// # Errors
    ///
    /// Returns an error if escalation is not permitted for this invocation
    /// or the identity change fails.
    pub fn escalate(&mut self) -> Result<PrivilegeGuard<'_>> {
        if !self.policy.escalation_allowed {
            return Err(VesselError::Privilege {
                message: "privilege escalation is not permitted for this invocation".into(),
            });
        }
        seteuid(Uid::from_raw(0)).map_err(|e| VesselError::Privilege {
            message: format!("could not escalate effective uid: {e}"),
        })?;
        setegid(Gid::from_raw(0)).map_err(|e| VesselError::Privilege {
            message: format!("could not escalate effective gid: {e}"),
        })?;
        self.escalated = true;
        tracing::trace!("privileges escalated");
        Ok(PrivilegeGuard { set: self })
    }

    /// Aborts the process if called while escalated.
    ///
    /// Executing user-influenced content with an escalated identity is a
    /// security defect, not a recoverable error.
    pub fn assert_user_context(&self) {
        if self.escalated {
            tracing::error!("user-influenced code reached while escalated; aborting");
            std::process::abort();
        }
    }

    /// Real (invoking) user ID.
    #[must_use]
    pub const fn real_uid(&self) -> Uid {
        self.ids.real_uid
    }

    /// Whether the binary runs in privileged-install mode.
    #[must_use]
    pub const fn suid_binary(&self) -> bool {
        self.policy.suid_binary
    }

    /// Whether escalation is permitted for this invocation.
    #[must_use]
    pub const fn escalation_allowed(&self) -> bool {
        self.policy.escalation_allowed
    }

    /// Whether `drop_privileges` has run.
    #[must_use]
    pub const fn dropped(&self) -> bool {
        self.dropped
    }

    fn restore(&mut self) {
        // Runs on every guard exit path. A failed restore would leave the
        // process escalated with no way to report it, so abort.
        if setegid(self.ids.real_gid).is_err() || seteuid(self.ids.real_uid).is_err() {
            tracing::error!("failed to restore unprivileged identity; aborting");
            std::process::abort();
        }
        self.escalated = false;
        tracing::trace!("privileges restored");
    }
}

/// Scoped escalation guard returned by [`PrivilegeSet::escalate`].
///
/// Restores the invoking user's effective identity when dropped.
#[derive(Debug)]
pub struct PrivilegeGuard<'a> {
    set: &'a mut PrivilegeSet,
}

impl Drop for PrivilegeGuard<'_> {
    fn drop(&mut self) {
        self.set.restore();
    }
}

/// Checks that `/proc/self/exe` is a root-owned SUID executable.
#[cfg(target_os = "linux")]
fn verify_suid_binary() -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let path = Path::new("/proc/self/exe");
    let meta = std::fs::metadata(path).map_err(|e| VesselError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if meta.uid() != 0 || meta.mode() & 0o4000 == 0 {
        return Err(VesselError::Privilege {
            message: "this program must be installed SUID root to run privileged".into(),
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn verify_suid_binary() -> Result<()> {
    Err(VesselError::Privilege {
        message: "privileged-install mode requires Linux".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(real: u32, effective: u32) -> IdentitySnapshot {
        IdentitySnapshot {
            real_uid: Uid::from_raw(real),
            real_gid: Gid::from_raw(real),
            effective_uid: Uid::from_raw(effective),
            effective_gid: Gid::from_raw(effective),
        }
    }

    #[test]
    fn unprivileged_run_allows_no_escalation() {
        let decision = evaluate_policy(ids(1000, 1000), true, false).expect("should pass");
        assert!(!decision.suid_binary);
        assert!(!decision.escalation_allowed);
    }

    #[test]
    fn root_run_allows_escalation_without_suid() {
        let decision = evaluate_policy(ids(0, 0), true, false).expect("should pass");
        assert!(!decision.suid_binary);
        assert!(decision.escalation_allowed);
    }

    #[test]
    fn suid_mode_detected_and_allowed() {
        let decision = evaluate_policy(ids(1000, 0), true, false).expect("should pass");
        assert!(decision.suid_binary);
        assert!(decision.escalation_allowed);
    }

    #[test]
    fn suid_mode_denied_by_admin_policy() {
        let err = evaluate_policy(ids(1000, 0), false, false).expect_err("should fail");
        assert!(matches!(err, VesselError::Privilege { .. }));
        assert_eq!(err.exit_status(), 255);
    }

    #[test]
    fn suid_mode_denied_by_user_override() {
        let err = evaluate_policy(ids(1000, 0), true, true).expect_err("should fail");
        assert!(matches!(err, VesselError::NosuidRequested { .. }));
        assert_eq!(err.exit_status(), 1);
    }

    #[test]
    fn nosuid_override_ignored_when_not_suid() {
        let decision = evaluate_policy(ids(1000, 1000), true, true).expect("should pass");
        assert!(!decision.suid_binary);
    }

    #[test]
    fn drop_is_noop_safe_for_matching_identity() {
        // When real == effective, dropping re-applies the current identity
        // and must succeed for any invoking user.
        let mut set = PrivilegeSet {
            ids: IdentitySnapshot::capture(),
            policy: PolicyDecision {
                suid_binary: false,
                escalation_allowed: false,
            },
            dropped: false,
            escalated: false,
        };
        set.drop_privileges().expect("drop should succeed");
        assert!(set.dropped());
        assert_eq!(geteuid(), getuid());
    }

    #[test]
    fn escalate_rejected_when_not_allowed() {
        let mut set = PrivilegeSet {
            ids: ids(1000, 1000),
            policy: PolicyDecision {
                suid_binary: false,
                escalation_allowed: false,
            },
            dropped: true,
            escalated: false,
        };
        assert!(set.escalate().is_err());
        set.assert_user_context();
    }
}
