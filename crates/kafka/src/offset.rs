use crate::error::{Error, Result};
use rdkafka::Offset;
use std::fmt;

/// Where the puller starts reading its partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartOffset {
    /// Oldest offset still retained by the broker
    Beginning,
    /// Only messages produced after the partition was assigned
    #[default]
    End,
    /// Absolute offset
    At(i64),
}

impl StartOffset {
    /// Raw value selecting the oldest retained offset
    pub const OLDEST: i64 = -2;
    /// Raw value selecting the newest offset
    pub const NEWEST: i64 = -1;

    /// Interpret a raw configured offset.
    ///
    /// `-2` and `-1` select the oldest and newest offsets, any non-negative
    /// value is an absolute offset. Other negative values are rejected.
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            Self::OLDEST => Ok(StartOffset::Beginning),
            Self::NEWEST => Ok(StartOffset::End),
            n if n >= 0 => Ok(StartOffset::At(n)),
            n => Err(Error::InvalidConfig(format!(
                "offset {n} is neither absolute nor one of {} (oldest) / {} (newest)",
                Self::OLDEST,
                Self::NEWEST
            ))),
        }
    }

    pub(crate) fn to_rdkafka(self) -> Offset {
        match self {
            StartOffset::Beginning => Offset::Beginning,
            StartOffset::End => Offset::End,
            StartOffset::At(n) => Offset::Offset(n),
        }
    }
}

impl fmt::Display for StartOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOffset::Beginning => write!(f, "oldest"),
            StartOffset::End => write!(f, "newest"),
            StartOffset::At(n) => write!(f, "{n}"),
        }
    }
}
