use std::fmt::{Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};

use crate::ValidationError;

const DATETIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Exchange-local wall-clock datetime as reported by the provider.
///
/// No offset is attached; two timestamps of the same partition are always in
/// the same exchange timezone, so plain ordering is correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(PrimitiveDateTime);

impl Timestamp {
    /// Parse `YYYY-MM-DD HH:MM:SS`, or `YYYY-MM-DD` as midnight.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if let Ok(datetime) = PrimitiveDateTime::parse(trimmed, DATETIME_FORMAT) {
            return Ok(Self(datetime));
        }

        Date::parse(trimmed, DATE_FORMAT)
            .map(|date| Self(PrimitiveDateTime::new(date, Time::MIDNIGHT)))
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    /// Canonical `YYYY-MM-DD HH:MM:SS` rendering, also used as the storage form.
    pub fn format(self) -> String {
        self.0
            .format(DATETIME_FORMAT)
            .expect("parsed timestamps are always formattable")
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}
