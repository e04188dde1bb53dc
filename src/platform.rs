//! Host distribution detection

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

/// Raspberry Pi media-center distribution the daemon runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    LibreElec,
    Osmc,
    Raspbian,
    Xbian,
    Unsupported,
}

/// Marker paths checked in order; the first present one wins.
const MARKERS: [(&str, Platform); 4] = [
    ("storage/.kodi", Platform::LibreElec),
    ("home/osmc", Platform::Osmc),
    ("home/pi", Platform::Raspbian),
    ("home/xbian", Platform::Xbian),
];

impl Platform {
    /// Detect the running distribution from well-known paths
    pub fn detect() -> Self {
        Self::detect_in(Path::new("/"))
    }

    /// Detect relative to an alternate filesystem root
    pub fn detect_in(root: &Path) -> Self {
        MARKERS
            .iter()
            .find(|(marker, _)| root.join(marker).exists())
            .map(|(_, platform)| *platform)
            .unwrap_or(Platform::Unsupported)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Platform::LibreElec => "libreelec",
            Platform::Osmc => "osmc",
            Platform::Raspbian => "raspbian",
            Platform::Xbian => "xbian",
            Platform::Unsupported => "unsupported",
        }
    }

    /// Unprivileged account that must join the gpio group, for platforms
    /// that need the elevated install.
    pub const fn install_user(&self) -> Option<&'static str> {
        match self {
            Platform::Osmc => Some("osmc"),
            Platform::Xbian => Some("xbian"),
            _ => None,
        }
    }

    /// True when GPIO access requires the elevated install.
    pub const fn needs_install(&self) -> bool {
        self.install_user().is_some()
    }

    /// True when a completed install only takes effect after a reboot.
    pub const fn restart_required(&self) -> bool {
        self.needs_install()
    }

    /// True when sudo on this platform prompts for a password.
    pub const fn sudo_needs_password(&self) -> bool {
        matches!(self, Platform::Xbian)
    }

    pub const fn is_supported(&self) -> bool {
        !matches!(self, Platform::Unsupported)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn root_with(markers: &[&str]) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        for marker in markers {
            fs::create_dir_all(root.path().join(marker)).unwrap();
        }
        root
    }

    #[test]
    fn detects_each_marker() {
        let cases = [
            ("storage/.kodi", Platform::LibreElec),
            ("home/osmc", Platform::Osmc),
            ("home/pi", Platform::Raspbian),
            ("home/xbian", Platform::Xbian),
        ];
        for (marker, expected) in cases {
            let root = root_with(&[marker]);
            assert_eq!(Platform::detect_in(root.path()), expected, "{marker}");
        }
    }

    #[test]
    fn earlier_marker_wins() {
        let root = root_with(&["home/pi", "home/osmc"]);
        assert_eq!(Platform::detect_in(root.path()), Platform::Osmc);
    }

    #[test]
    fn no_marker_is_unsupported() {
        let root = root_with(&[]);
        assert_eq!(Platform::detect_in(root.path()), Platform::Unsupported);
        assert!(!Platform::Unsupported.is_supported());
    }

    #[test]
    fn install_requirements() {
        assert!(!Platform::LibreElec.needs_install());
        assert!(!Platform::Raspbian.restart_required());
        assert_eq!(Platform::Osmc.install_user(), Some("osmc"));
        assert!(Platform::Xbian.restart_required());
        assert!(Platform::Xbian.sudo_needs_password());
        assert!(!Platform::Osmc.sudo_needs_password());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Platform::LibreElec).unwrap(), "\"libreelec\"");
        assert_eq!(Platform::Xbian.to_string(), "xbian");
    }
}
