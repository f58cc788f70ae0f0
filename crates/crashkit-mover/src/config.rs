use std::fmt;
use std::num::NonZeroU64;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crashkit_store::BackendConfig;
use crashkit_tasks::TaskConfig;

use crate::error::{MoverError, MoverResult};

/// How many crashes the mover submits before its job source ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SubmissionsRepr", into = "SubmissionsRepr")]
pub enum Submissions {
    /// Keep polling for new crashes until stopped.
    #[default]
    Forever,
    /// One enumeration pass, then stop.
    All,
    /// Stop after this many crashes.
    Count(NonZeroU64),
}

impl fmt::Display for Submissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => f.write_str("forever"),
            Self::All => f.write_str("all"),
            Self::Count(n) => write!(f, "{n}"),
        }
    }
}

impl std::str::FromStr for Submissions {
    type Err = MoverError;

    fn from_str(s: &str) -> MoverResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forever" => Ok(Self::Forever),
            "all" => Ok(Self::All),
            other => other
                .parse::<u64>()
                .ok()
                .and_then(NonZeroU64::new)
                .map(Self::Count)
                .ok_or_else(|| {
                    MoverError::Config(format!(
                        "number_of_submissions must be \"forever\", \"all\" or a positive count, got {s:?}"
                    ))
                }),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SubmissionsRepr {
    Count(u64),
    Word(String),
}

impl TryFrom<SubmissionsRepr> for Submissions {
    type Error = MoverError;

    fn try_from(repr: SubmissionsRepr) -> MoverResult<Self> {
        match repr {
            SubmissionsRepr::Count(n) => NonZeroU64::new(n)
                .map(Self::Count)
                .ok_or_else(|| MoverError::Config("number_of_submissions must be positive".into())),
            SubmissionsRepr::Word(word) => word.parse(),
        }
    }
}

impl From<Submissions> for SubmissionsRepr {
    fn from(s: Submissions) -> Self {
        match s {
            Submissions::Count(n) => Self::Count(n.get()),
            other => Self::Word(other.to_string()),
        }
    }
}

/// Everything a mover run needs.
///
/// ```toml
/// number_of_submissions = "all"
///
/// [source]
/// kind = "fs_dated_radix"
/// storage_root = "/var/crashes/incoming"
///
/// [destination]
/// kind = "fs_radix"
/// storage_root = "/var/crashes/archive"
///
/// [tasks]
/// number_of_threads = 4
/// maximum_queue_size = 8
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverConfig {
    /// Store crashes are fetched from.
    pub source: BackendConfig,
    /// Store crashes are saved to.
    pub destination: BackendConfig,
    /// Store asked for new crash ids. Defaults to `source`.
    pub new_crash_source: Option<BackendConfig>,
    pub number_of_submissions: Submissions,
    pub tasks: TaskConfig,
}

impl MoverConfig {
    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> MoverResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MoverError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| MoverError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MoverResult<()> {
        self.tasks.validate()?;
        Ok(())
    }
}
