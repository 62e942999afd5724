use std::ops::Deref;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::level_default")]
    pub level: Level,
    ///Include timestamps in log lines
    #[serde(default = "Log::timestamps_default")]
    pub timestamps: bool,
}

impl Default for Log {
    #[inline]
    fn default() -> Self {
        Self { level: Self::level_default(), timestamps: Self::timestamps_default() }
    }
}

impl Log {
    #[inline]
    fn level_default() -> Level {
        Level { inner: log::LevelFilter::Info }
    }
    #[inline]
    fn timestamps_default() -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    inner: log::LevelFilter,
}

impl Level {
    #[inline]
    pub fn inner(&self) -> log::LevelFilter {
        self.inner
    }
}

impl From<log::LevelFilter> for Level {
    #[inline]
    fn from(inner: log::LevelFilter) -> Self {
        Level { inner }
    }
}

impl Deref for Level {
    type Target = log::LevelFilter;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'de> Deserialize<'de> for Level {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        let level = log::LevelFilter::from_str(&level)
            .map_err(|_e| de::Error::custom(format!("invalid log level {:?}", level)))?;
        Ok(Level { inner: level })
    }
}
