use crate::internal::config::{ConfigError, TieBreak};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::{cmp::Ordering, fmt, path::PathBuf, str::FromStr};

// <version>-<release>.<flavor>, e.g. 4.4.4-160.native
static IDENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?-(\d+)\.([A-Za-z0-9_+-]+)$")
        .expect("kernel identity pattern is valid")
});

// Two component versions order as `x.y.0` but keep their own text, so
// `6.1-12.lts` and `6.1.0-12.lts` are distinct kernels with distinct files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    text: String,
}

impl KernelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            text: format!("{}.{}.{}", major, minor, patch),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// Unique by (version, release, flavor). `compare` applies the configured tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelId {
    pub version: KernelVersion,
    pub release: u32,
    pub flavor: String,
}

impl KernelId {
    pub fn new(version: KernelVersion, release: u32, flavor: impl Into<String>) -> Self {
        Self {
            version,
            release,
            flavor: flavor.into(),
        }
    }

    // <version>-<release>.<flavor>
    pub fn parse(identity: &str) -> Result<Self, ConfigError> {
        let caps = IDENTITY_RE
            .captures(identity.trim())
            .ok_or_else(|| ConfigError::InvalidKernelName(identity.to_string()))?;

        let number = |idx: usize| -> Result<u32, ConfigError> {
            caps.get(idx)
                .map(|m| m.as_str().parse::<u32>())
                .transpose()
                .map_err(|_| ConfigError::InvalidKernelName(identity.to_string()))
                .map(|v| v.unwrap_or(0))
        };

        let major = number(1)?;
        let minor = number(2)?;
        let patch = number(3)?;
        let release = number(4)?;
        let text = match caps.get(3) {
            Some(_) => format!("{}.{}.{}", major, minor, patch),
            None => format!("{}.{}", major, minor),
        };

        Ok(Self {
            version: KernelVersion {
                major,
                minor,
                patch,
                text,
            },
            release,
            flavor: caps[5].to_string(),
        })
    }

    pub fn from_image_name(namespace: &str, file_name: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidKernelName(file_name.to_string());
        let rest = file_name
            .strip_prefix(namespace)
            .and_then(|r| r.strip_prefix('.'))
            .ok_or_else(invalid)?;
        let (flavor, version_release) = rest.split_once('.').ok_or_else(invalid)?;
        Self::parse(&format!("{}.{}", version_release, flavor)).map_err(|_| invalid())
    }

    pub fn compare(&self, other: &Self, tie_break: TieBreak) -> Ordering {
        let by_version = self.version.cmp(&other.version);
        let by_release = self.release.cmp(&other.release);
        let by_flavor = self.flavor.cmp(&other.flavor);
        match tie_break {
            TieBreak::ReleaseFirst => by_version.then(by_release).then(by_flavor),
            TieBreak::FlavorFirst => by_version.then(by_flavor).then(by_release),
        }
    }

    pub fn image_name(&self, namespace: &str) -> String {
        format!(
            "{}.{}.{}-{}",
            namespace, self.flavor, self.version, self.release
        )
    }

    pub fn entry_slug(&self, namespace: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            namespace, self.flavor, self.version, self.release
        )
    }
}

impl FromStr for KernelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.version, self.release, self.flavor)
    }
}

impl Serialize for KernelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelEntry {
    pub id: KernelId,
    pub image: PathBuf,
    pub initrd: Option<PathBuf>,
    pub cmdline: String,
    pub booted: bool,
}

impl KernelEntry {
    pub fn flavor(&self) -> &str {
        &self.id.flavor
    }

    pub fn initrd_name(&self) -> Option<String> {
        self.initrd
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }
}
