//! Default path resolution for the settings file.

use std::path::PathBuf;

/// Returns the default path for the settings file.
///
/// Uses the platform config directory if available:
/// - Linux/macOS: `~/.config/sirocco/settings.toml`
/// - Fallback: `/etc/sirocco/settings.toml`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("sirocco")
        .join("settings.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_path_is_toml() {
        let path = default_settings_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("toml"));
        assert!(path.ends_with("sirocco/settings.toml"));
    }
}
