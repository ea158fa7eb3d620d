use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

const CONFIG_ENV: &str = "BOOTMAN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "etc/bootman/config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    #[default]
    ReleaseFirst,
    FlavorFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Auto,
    SystemdBoot,
    Extlinux,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub namespace: String,
    pub os_name: String,
    pub primary_flavor: String,
    pub tie_break: TieBreak,
    pub backend: BackendKind,
    pub kernel_dir: PathBuf,
    pub boot_dir: PathBuf,
    pub systemd_boot_source: PathBuf,
    pub extlinux_source: PathBuf,
    pub root_options: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "org.bootman".to_string(),
            os_name: "Linux".to_string(),
            primary_flavor: "native".to_string(),
            tie_break: TieBreak::default(),
            backend: BackendKind::default(),
            kernel_dir: PathBuf::from("usr/lib/kernel"),
            boot_dir: PathBuf::from("boot"),
            systemd_boot_source: PathBuf::from("usr/lib/systemd/boot/efi"),
            extlinux_source: PathBuf::from("usr/share/syslinux"),
            root_options: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid kernel name: {0}")]
    InvalidKernelName(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

impl Config {
    // `BOOTMAN_CONFIG` wins over `<root>/etc/bootman/config.json`. A missing
    // file is not an error and yields the defaults.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join(DEFAULT_CONFIG_PATH));
        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_json(&path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    fn from_json(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::MissingField("namespace"));
        }
        if self.primary_flavor.trim().is_empty() {
            return Err(ConfigError::MissingField("primary_flavor"));
        }
        Ok(())
    }

    pub fn resolve(&self, root: &Path, path: &Path) -> PathBuf {
        root.join(path.strip_prefix("/").unwrap_or(path))
    }
}
