//! Time bucket encoding for slot files.
//!
//! The timeline is partitioned into half-day buckets in local time. Each
//! bucket is identified by a single integer
//!
//! ```text
//! year * 100000 + month * 1000 + day * 10 + (5 if hour >= 12 else 0)
//! ```
//!
//! so that integer order matches chronological order. The identifier also
//! names the bucket's files on disk: the folder is `id / 1000` (`"201704"`)
//! and the file base name is `id % 1000` zero-padded to three digits
//! (`"015"` for the afternoon of the 1st).
//!
//! # Example
//!
//! ```rust
//! use slotdb::bucket::BucketId;
//!
//! let bucket = BucketId::from_parts(2017, 12, 1, 23);
//! assert_eq!(bucket.raw(), 201712015);
//! assert_eq!(bucket.path(), ("201712".to_string(), "015".to_string()));
//! assert!(!bucket.is_morning());
//! ```

use std::fmt;

use chrono::{DateTime, Datelike, Local, LocalResult, NaiveDate, TimeZone, Timelike};

use crate::error::{BucketError, QueryError};

/// Number of seconds covered by one half-day bucket.
pub const HALF_DAY_SECS: u32 = 43_200;

const YEAR_FACTOR: u32 = 100_000;
const MONTH_FACTOR: u32 = 1_000;
const DAY_FACTOR: u32 = 10;
const AFTERNOON_FLAG: u32 = 5;

/// Identifier of a half-day time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketId(u32);

impl BucketId {
    /// Lowest possible identifier, used for unbounded range starts.
    pub const MIN: Self = Self(0);

    /// Highest possible identifier, used for unbounded range ends.
    pub const MAX: Self = Self(u32::MAX);

    /// Encodes calendar fields into a bucket identifier.
    ///
    /// `hour` only selects the half-day; any value of 12 or above is an
    /// afternoon bucket.
    pub fn from_parts(year: u32, month: u32, day: u32, hour: u32) -> Self {
        let mut encoded = year * YEAR_FACTOR + month * MONTH_FACTOR + day * DAY_FACTOR;
        if hour >= 12 {
            encoded += AFTERNOON_FLAG;
        }
        Self(encoded)
    }

    /// Encodes an instant using its calendar fields in the instant's own zone.
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        #[allow(clippy::cast_sign_loss)] // years before 0 AD are outside the domain
        let year = dt.year().max(0) as u32;
        Self::from_parts(year, dt.month(), dt.day(), dt.hour())
    }

    /// Encodes a unix timestamp (seconds) in local time.
    pub fn from_unix(timestamp: u32) -> Self {
        let utc = DateTime::from_timestamp(i64::from(timestamp), 0).unwrap_or_default();
        Self::from_datetime(&utc.with_timezone(&Local))
    }

    /// Returns the bucket containing the current wall-clock time.
    pub fn current() -> Self {
        Self::from_datetime(&Local::now())
    }

    /// Wraps a raw identifier without validation.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw integer identifier.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Calendar year of the bucket.
    pub const fn year(self) -> u32 {
        self.0 / YEAR_FACTOR
    }

    /// Calendar month (1-12) of the bucket.
    pub const fn month(self) -> u32 {
        (self.0 / MONTH_FACTOR) % 100
    }

    /// Day of month (1-31) of the bucket.
    pub const fn day(self) -> u32 {
        (self.0 / DAY_FACTOR) % 100
    }

    /// Whether the bucket covers the hours before noon.
    pub const fn is_morning(self) -> bool {
        self.0 % DAY_FACTOR == 0
    }

    /// Year-month folder value, as compared by [`BucketRange::folder_in_range`].
    pub const fn folder_value(self) -> u32 {
        self.0 / MONTH_FACTOR
    }

    /// Returns `(folder_name, file_base_name)` for this bucket.
    pub fn path(self) -> (String, String) {
        (
            self.folder_value().to_string(),
            format!("{:03}", self.0 % MONTH_FACTOR),
        )
    }

    /// Parses a bucket back from its folder and file base name.
    ///
    /// The folder must be exactly six digits and the file base name exactly
    /// three digits. A trailing extension on the file name is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::InvalidPath`] if either component is malformed.
    pub fn from_path(folder: &str, file: &str) -> Result<Self, BucketError> {
        let invalid = |reason| BucketError::InvalidPath {
            folder: folder.to_string(),
            file: file.to_string(),
            reason,
        };

        let stem = file.split_once('.').map_or(file, |(stem, _)| stem);

        if folder.len() != 6 {
            return Err(invalid("folder name must be 6 digits"));
        }
        if stem.len() != 3 {
            return Err(invalid("file name must be 3 digits"));
        }

        let folder_value = parse_digits(folder).ok_or_else(|| invalid("folder name is not numeric"))?;
        let file_value = parse_digits(stem).ok_or_else(|| invalid("file name is not numeric"))?;

        Ok(Self(folder_value * MONTH_FACTOR + file_value))
    }

    /// Unix timestamp at which this bucket starts.
    ///
    /// Morning buckets start at local midnight, afternoon buckets at local
    /// noon. On days without a DST transition noon is exactly midnight plus
    /// [`HALF_DAY_SECS`].
    ///
    /// # Compatibility
    ///
    /// Stores that placed the afternoon origin at midnight plus
    /// [`HALF_DAY_SECS`] agree with this on every day except DST transition
    /// days. Offsets written into an afternoon `.idx` file on such a day by
    /// those stores decode here shifted by the DST delta (usually one hour).
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Timestamp`] if the calendar fields are invalid
    /// or the origin falls outside the `u32` timestamp domain.
    pub fn origin(self) -> Result<u32, BucketError> {
        let err = || BucketError::Timestamp { bucket: self.0 };

        let year = i32::try_from(self.year()).map_err(|_| err())?;
        let date = NaiveDate::from_ymd_opt(year, self.month(), self.day()).ok_or_else(err)?;
        let hour = if self.is_morning() { 0 } else { 12 };
        let naive = date.and_hms_opt(hour, 0, 0).ok_or_else(err)?;

        let local = match Local.from_local_datetime(&naive) {
            LocalResult::Single(t) => t,
            LocalResult::Ambiguous(earliest, _) => earliest,
            // The wall-clock hour was skipped by a DST jump; the bucket starts
            // at the first instant that exists.
            LocalResult::None => Local
                .from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
                .ok_or_else(err)?,
        };

        u32::try_from(local.timestamp()).map_err(|_| err())
    }

    /// Seconds between this bucket's origin and `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::Timestamp`] if the timestamp precedes the
    /// origin or the offset does not fit the 2-byte on-disk field.
    pub fn offset_of(self, timestamp: u32) -> Result<u16, BucketError> {
        let origin = self.origin()?;
        timestamp
            .checked_sub(origin)
            .and_then(|offset| u16::try_from(offset).ok())
            .ok_or(BucketError::Timestamp { bucket: self.0 })
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Inclusive range of buckets used to prune directory scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRange {
    start: BucketId,
    end: BucketId,
}

impl BucketRange {
    /// Builds the bucket range covering `[start_unix, end_unix]`.
    ///
    /// A zero bound is unbounded in its direction.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] if both bounds are non-zero
    /// and `start_unix > end_unix`.
    pub fn new(start_unix: u32, end_unix: u32) -> Result<Self, QueryError> {
        if start_unix != 0 && end_unix != 0 && start_unix > end_unix {
            return Err(QueryError::InvalidTimeRange {
                start: start_unix,
                end: end_unix,
            });
        }

        let start = if start_unix == 0 {
            BucketId::MIN
        } else {
            BucketId::from_unix(start_unix)
        };
        let end = if end_unix == 0 {
            BucketId::MAX
        } else {
            BucketId::from_unix(end_unix)
        };

        Ok(Self { start, end })
    }

    /// First bucket of the range.
    pub fn start(&self) -> BucketId {
        self.start
    }

    /// Last bucket of the range.
    pub fn end(&self) -> BucketId {
        self.end
    }

    /// Whether a year-month folder (e.g. `"201703"`) may hold buckets in range.
    ///
    /// Names that are not numeric never match.
    pub fn folder_in_range(&self, folder: &str) -> bool {
        let Some(value) = parse_digits(folder) else {
            return false;
        };
        value >= self.start.folder_value() && value <= self.end.folder_value()
    }

    /// Whether a bucket lies within the range.
    pub fn file_in_range(&self, bucket: BucketId) -> bool {
        bucket >= self.start && bucket <= self.end
    }
}
