//! Privilege and driver checks run before capture starts.

use std::env;
use std::path::PathBuf;

use log::{error, info};

use crate::error::Result;

/// Driver files WinDivert loads from the executable's directory.
pub const WINDIVERT_FILES: [&str; 2] = ["WinDivert.dll", "WinDivert64.sys"];

/// Fails with [`ThrottlerError::NotElevated`](crate::error::ThrottlerError::NotElevated) unless the process runs as
/// administrator. Capture is Windows-only, so other platforms pass.
pub fn ensure_admin_privileges() -> Result<()> {
    #[cfg(windows)]
    {
        if !is_admin() {
            error!("Administrator privileges required to capture network packets. Please run as administrator.");
            return Err(crate::error::ThrottlerError::NotElevated);
        }
        info!("Administrator privileges verified");
    }

    Ok(())
}

/// Check if the current process is running with administrator privileges
#[cfg(windows)]
pub fn is_admin() -> bool {
    use winapi::um::securitybaseapi::{AllocateAndInitializeSid, CheckTokenMembership, FreeSid};
    use winapi::um::winnt::{
        DOMAIN_ALIAS_RID_ADMINS, SECURITY_BUILTIN_DOMAIN_RID, SECURITY_NT_AUTHORITY,
    };

    unsafe {
        let mut sid = std::ptr::null_mut();

        if AllocateAndInitializeSid(
            &SECURITY_NT_AUTHORITY as *const _ as *mut _,
            2,
            SECURITY_BUILTIN_DOMAIN_RID,
            DOMAIN_ALIAS_RID_ADMINS,
            0,
            0,
            0,
            0,
            0,
            0,
            &mut sid,
        ) == 0
        {
            return false;
        }

        let mut is_member = 0;
        let elevated =
            CheckTokenMembership(std::ptr::null_mut(), sid, &mut is_member) != 0 && is_member != 0;

        FreeSid(sid);
        elevated
    }
}

/// Logs where the WinDivert files are expected and whether they exist.
///
/// Returns `true` when all of them are present.
pub fn check_windivert_files() -> bool {
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| {
            error!("Failed to locate the executable directory");
            PathBuf::from(".")
        });

    let mut all_present = true;
    for name in WINDIVERT_FILES {
        let path = exe_dir.join(name);
        let exists = path.exists();
        info!("{} at {}: {}", name, path.display(), if exists { "found" } else { "missing" });
        all_present &= exists;
    }
    all_present
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_files_are_not_next_to_test_binary() {
        assert!(!check_windivert_files());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_privilege_check_passes_off_windows() {
        assert!(ensure_admin_privileges().is_ok());
    }
}
