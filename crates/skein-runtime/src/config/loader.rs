//! Layered configuration loading with figment.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. [`SkeinConfig::default`], or the config passed to [`ConfigLoader::merge`]
//! 2. the profile file, e.g. `skein.production.toml`
//! 3. the main file, `skein.toml` (or `config.toml`)
//! 4. `SKEIN_*` environment variables, nested with `__`
//!    (`SKEIN_POLLING__TIMEOUT_SECS=50` sets `polling.timeout_secs`)
//! 5. keys set with [`ConfigLoader::set`]
//!
//! TOML files need the `toml-config` feature (on by default), YAML files
//! (`.yaml` / `.yml`) the `yaml-config` feature. With both enabled, the first
//! main file found in the search paths is used, TOML checked first.
//!
//! ```rust,ignore
//! use skein_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .search_path("/etc/skein")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Serialized};
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format as _;
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::SkeinConfig;

const ENV_PREFIX: &str = "SKEIN_";
const PROFILE_VAR: &str = "SKEIN_PROFILE";
const FILE_STEMS: &[&str] = &["skein", "config"];

// =============================================================================
// Profile
// =============================================================================

/// Deployment profile, selecting an extra `skein.{profile}.*` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `SKEIN_PROFILE`. Unset means development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|name| Self::from(name.as_str()))
            .unwrap_or_default()
    }
}

impl From<&str> for Profile {
    fn from(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            "dev" | "development" => Self::Development,
            "prod" | "production" => Self::Production,
            _ => Self::Custom(name),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// File formats
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum FileFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl FileFormat {
    /// Enabled formats, in search order.
    const ENABLED: &'static [FileFormat] = &[
        #[cfg(feature = "toml-config")]
        FileFormat::Toml,
        #[cfg(feature = "yaml-config")]
        FileFormat::Yaml,
    ];

    fn extensions(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &["toml"],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &["yaml", "yml"],
        }
    }

    fn of(path: &Path) -> ConfigResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        Self::ENABLED
            .iter()
            .copied()
            .find(|format| format.extensions().contains(&ext))
            .ok_or_else(|| ConfigError::UnsupportedFormat(ext.to_string()))
    }

    #[allow(unused_variables)]
    fn merge_into(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(figment::providers::Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(figment::providers::Yaml::file(path)),
        }
    }
}

/// A main config file and the profile file next to it, if present.
#[derive(Debug)]
struct FoundFile {
    format: FileFormat,
    main: PathBuf,
    profile: Option<PathBuf>,
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Builds a [`SkeinConfig`] from defaults, files, environment and overrides.
#[derive(Debug)]
pub struct ConfigLoader {
    defaults: Option<SkeinConfig>,
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    file: Option<PathBuf>,
    env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader for the profile named by `SKEIN_PROFILE`.
    pub fn new() -> Self {
        Self {
            defaults: None,
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            file: None,
            env: true,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::from(profile.as_ref());
        self
    }

    /// Adds a directory to search. Without any, the current directory and
    /// `<config dir>/skein` are searched.
    pub fn search_path(mut self, dir: impl AsRef<Path>) -> Self {
        self.search_paths.push(dir.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file instead of searching. It must exist.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Ignores `SKEIN_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Uses `config` in place of the built-in defaults.
    pub fn merge(mut self, config: SkeinConfig) -> Self {
        self.defaults = Some(config);
        self
    }

    /// Sets a dotted key such as `"polling.limit"` above every other source.
    pub fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    pub fn load(self) -> ConfigResult<SkeinConfig> {
        let profile = self.profile.clone();
        let config: SkeinConfig = self.figment()?.extract()?;

        debug!(
            %profile,
            level = %config.logging.level,
            limit = config.polling.limit,
            timeout_secs = config.polling.timeout_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(self.defaults.clone().unwrap_or_default()));

        let found = match &self.file {
            Some(path) if !path.exists() => return Err(ConfigError::FileNotFound(path.clone())),
            Some(path) => Some(FoundFile {
                format: FileFormat::of(path)?,
                main: path.clone(),
                profile: None,
            }),
            None => self.find_file(),
        };

        match found {
            Some(found) => {
                if let Some(profile_path) = &found.profile {
                    debug!(path = %profile_path.display(), "Merging profile config");
                    figment = found.format.merge_into(figment, profile_path);
                }
                info!(path = %found.main.display(), "Merging config file");
                figment = found.format.merge_into(figment, &found.main);
            }
            None if self.file.is_none() => {
                warn!(profile = %self.profile, "No config file found, using defaults");
            }
            None => {}
        }

        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }
        Ok(figment.merge(self.overrides))
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("skein")))
            .collect()
    }

    /// First main file over dirs, formats, stems and extensions, in that
    /// nesting order.
    fn find_file(&self) -> Option<FoundFile> {
        let profile = self.profile.as_str();
        for dir in self.search_dirs() {
            for &format in FileFormat::ENABLED {
                for stem in FILE_STEMS {
                    for ext in format.extensions() {
                        let main = dir.join(format!("{stem}.{ext}"));
                        if !main.is_file() {
                            continue;
                        }
                        let profile_path = dir.join(format!("{stem}.{profile}.{ext}"));
                        return Some(FoundFile {
                            format,
                            main,
                            profile: profile_path.is_file().then_some(profile_path),
                        });
                    }
                }
            }
        }
        None
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<SkeinConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path`, with environment overrides.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<SkeinConfig> {
    ConfigLoader::new().file(path).load()
}
