//! ConfigLoader: defaults, optional file, environment overlay.

use super::MirrorConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// File looked up in the working directory when no explicit path is given.
const DEFAULT_FILE: &str = "dirmirror.toml";

/// Configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    /// Precedence: defaults (lowest) -> config file -> environment (highest).
    ///
    /// An explicit `path` must exist; the default `dirmirror.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<MirrorConfig, ConfigError> {
        let builder = Self::builder_with_defaults()?;
        let builder = match path {
            Some(path) => builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            ),
            None => builder.add_source(
                File::from(PathBuf::from(DEFAULT_FILE))
                    .format(FileFormat::Toml)
                    .required(false),
            ),
        };
        let builder = Self::add_environment(builder, "DIRMIRROR");
        builder.build()?.try_deserialize()
    }

    /// Load from TOML text with no environment overlay.
    pub fn from_toml_str(text: &str) -> Result<MirrorConfig, ConfigError> {
        Self::builder_with_defaults()?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = Config::try_from(&MirrorConfig::default())?;
        Ok(Config::builder().add_source(defaults))
    }

    /// Environment variable overlay: `<PREFIX>_*` with `__` between nested keys.
    fn add_environment(builder: ConfigBuilder<DefaultState>, prefix: &str) -> ConfigBuilder<DefaultState> {
        builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }
}
