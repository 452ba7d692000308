use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use ::time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime, UtcOffset,
};

/// A UTC instant, rendered as an ISO-8601 / RFC 3339 string with
/// millisecond precision (`2024-05-01T08:30:00.123Z`).
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        let millis = now.millisecond();

        // truncated to the precision clients see
        now.replace_millisecond(millis).map(Self).unwrap_or(Self(now))
    }

    pub fn unix(&self) -> i64 {
        self.0.unix_timestamp()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // always UTC, see `now` and `from_str`
        let format =
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

        match self.0.format(format) {
            Ok(s) => write!(fmt, "{s}"),
            Err(_) => write!(fmt, "{}", self.0.unix_timestamp()),
        }
    }
}

impl std::str::FromStr for Timestamp {
    type Err = ::time::error::Parse;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OffsetDateTime::parse(s, &Rfc3339).map(|when| Self(when.to_offset(UtcOffset::UTC)))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
