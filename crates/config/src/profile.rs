//! Game profiles.
//!
//! A profile tells the decider which game it is playing and how: the app
//! package to keep in the foreground, a context paragraph, rules and tips.
//! Profiles live as `<profiles_dir>/<name>.toml`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Per-game prompt material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameProfile {
    pub name: String,

    /// Android package kept in the foreground, e.g. `com.example.spades`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_package: Option<String>,

    #[serde(default = "default_context")]
    pub system_context: String,

    #[serde(default)]
    pub rules: String,

    #[serde(default)]
    pub tips: String,
}

fn default_context() -> String {
    "You are playing a mobile game.".into()
}

impl Default for GameProfile {
    fn default() -> Self {
        Self::generic()
    }
}

impl GameProfile {
    /// Name of the profile that falls back to [`GameProfile::generic`].
    pub const DEFAULT_NAME: &'static str = "default";

    /// Built-in profile used when no `default.toml` exists.
    pub fn generic() -> Self {
        Self {
            name: Self::DEFAULT_NAME.into(),
            app_package: None,
            system_context: default_context(),
            rules: String::new(),
            tips: "Read on-screen instructions carefully. Dismiss ads and pop-ups \
                   with their close button or BACK before continuing."
                .into(),
        }
    }

    /// Load `<dir>/<name>.toml`.
    ///
    /// A missing `default` profile yields [`GameProfile::generic`]; any other
    /// missing profile is an error.
    pub fn load(dir: &Path, name: &str) -> Result<Self, ConfigError> {
        let path = dir.join(format!("{name}.toml"));
        if !path.exists() {
            if name == Self::DEFAULT_NAME {
                tracing::debug!(dir = %dir.display(), "No default profile on disk, using built-in");
                return Ok(Self::generic());
            }
            return Err(ConfigError::ProfileNotFound {
                name: name.to_string(),
                dir: dir.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        #[derive(Deserialize)]
        struct RawProfile {
            name: Option<String>,
            app_package: Option<String>,
            #[serde(default = "default_context")]
            system_context: String,
            #[serde(default)]
            rules: String,
            #[serde(default)]
            tips: String,
        }

        let raw: RawProfile = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            name: raw.name.unwrap_or_else(|| name.to_string()),
            app_package: raw.app_package.filter(|p| !p.trim().is_empty()),
            system_context: raw.system_context,
            rules: raw.rules,
            tips: raw.tips,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_profile_is_generic() {
        let dir = tempfile::tempdir().unwrap();
        let profile = GameProfile::load(dir.path(), "default").unwrap();
        assert_eq!(profile, GameProfile::generic());
    }

    #[test]
    fn missing_named_profile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GameProfile::load(dir.path(), "spades").unwrap_err();
        assert!(matches!(err, ConfigError::ProfileNotFound { ref name, .. } if name == "spades"));
    }

    #[test]
    fn profile_file_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("spades.toml"),
            r#"
app_package = "com.example.spades"
system_context = "You are playing Spades against three bots."
rules = "Follow suit when you can."
"#,
        )
        .unwrap();

        let profile = GameProfile::load(dir.path(), "spades").unwrap();
        assert_eq!(profile.name, "spades");
        assert_eq!(profile.app_package.as_deref(), Some("com.example.spades"));
        assert!(profile.system_context.contains("Spades"));
        assert_eq!(profile.rules, "Follow suit when you can.");
        assert!(profile.tips.is_empty());
    }

    #[test]
    fn blank_app_package_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("puzzle.toml"), "app_package = \"\"\n").unwrap();
        let profile = GameProfile::load(dir.path(), "puzzle").unwrap();
        assert!(profile.app_package.is_none());
        assert_eq!(profile.system_context, "You are playing a mobile game.");
    }
}
