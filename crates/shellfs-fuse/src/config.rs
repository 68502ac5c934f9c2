//! Mount configuration.

use fuser::MountOption;

/// Options controlling how the filesystem is mounted.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Filesystem name shown in mount tables.
    pub fs_name: String,
    /// Allow other users to access the mount (requires
    /// `user_allow_other` in `/etc/fuse.conf`).
    pub allow_other: bool,
    /// Automatically unmount when the process exits.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "shell-command-fs".to_string(),
            allow_other: false,
            auto_unmount: false,
        }
    }
}

impl MountConfig {
    /// Builds the FUSE mount option list. The projection is always
    /// read-only.
    pub fn options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype("shellfs".to_string()),
            MountOption::RO,
            MountOption::DefaultPermissions,
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_read_only() {
        let options = MountConfig::default().options();
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::DefaultPermissions));
        assert!(!options.contains(&MountOption::AllowOther));
        assert!(!options.contains(&MountOption::AutoUnmount));
    }

    #[test]
    fn test_optional_flags() {
        let config = MountConfig {
            allow_other: true,
            auto_unmount: true,
            ..MountConfig::default()
        };
        let options = config.options();
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::AutoUnmount));
    }

    #[test]
    fn test_fs_name_and_subtype() {
        let options = MountConfig::default().options();
        assert!(options
            .iter()
            .any(|o| matches!(o, MountOption::FSName(n) if n == "shell-command-fs")));
        assert!(options
            .iter()
            .any(|o| matches!(o, MountOption::Subtype(s) if s == "shellfs")));
    }
}
