use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Textual form of every timestamp persisted by the store.
/// Lexical order equals chronological order, which the range queries rely on.
pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Custom serde module for NaiveDateTime to keep the storage format on the wire
pub mod naive_format {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    use super::STORAGE_FORMAT;

    pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = date.format(STORAGE_FORMAT).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, STORAGE_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Format a UTC instant the way the store keeps it (zone stripped)
pub fn to_storage(instant: &DateTime<Utc>) -> String {
    instant.naive_utc().format(STORAGE_FORMAT).to_string()
}

/// Format a range bound for comparison against stored timestamps.
/// Fractional seconds are kept, so a bound at `10:00:00.500` sorts after
/// a stored `10:00:00`. Whole-second bounds format exactly like [`to_storage`].
pub fn to_storage_bound(instant: &DateTime<Utc>) -> String {
    instant.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Parse a stored timestamp back into a naive UTC value
pub fn from_storage(s: &str) -> chrono::ParseResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, STORAGE_FORMAT)
}

/// A platform account. Identity is the numeric id; the name is whatever
/// was observed first and may collide across accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub text: String,
    /// UTC, timezone stripped
    #[serde(with = "naive_format")]
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub reply_to_user_id: Option<i64>,
    /// Not guaranteed to reference a stored post
    #[serde(default)]
    pub reply_to_post_id: Option<i64>,
    /// The original post this one re-shares
    #[serde(default)]
    pub repost_of: Option<i64>,
}

impl Post {
    pub fn is_repost(&self) -> bool {
        self.repost_of.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to_user_id.is_some()
    }
}

/// Case-folded hashtag text (without the leading `#`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hashtag {
    pub tag: String,
}

/// Case-folded expanded URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Url {
    pub url: String,
}

/// An entity paired with the number of associations counted for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counted<T> {
    pub item: T,
    pub count: i64,
}

impl<T> Counted<T> {
    pub fn new(item: T, count: i64) -> Self {
        Self { item, count }
    }
}

/// Row totals for each stored entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub posts: i64,
    pub users: i64,
    pub hashtags: i64,
    pub urls: i64,
}

/// Half-open time window `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self { start, stop }
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start && *instant < self.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_storage_format_roundtrip_strips_zone() {
        let instant = Utc.with_ymd_and_hms(2015, 10, 28, 14, 5, 9).unwrap();
        let stored = to_storage(&instant);
        assert_eq!(stored, "2015-10-28 14:05:09");
        assert_eq!(from_storage(&stored).unwrap(), instant.naive_utc());
    }

    #[test]
    fn test_storage_format_orders_lexically() {
        let early = to_storage(&Utc.with_ymd_and_hms(2015, 9, 30, 23, 59, 59).unwrap());
        let late = to_storage(&Utc.with_ymd_and_hms(2015, 10, 1, 0, 0, 0).unwrap());
        assert!(early < late);
    }

    #[test]
    fn test_bound_keeps_fractional_seconds() {
        let whole = Utc.with_ymd_and_hms(2015, 10, 27, 10, 0, 0).unwrap();
        let later = whole + chrono::Duration::milliseconds(500);
        assert_eq!(to_storage_bound(&whole), to_storage(&whole));
        assert_eq!(to_storage_bound(&later), "2015-10-27 10:00:00.500");
        assert!(to_storage(&whole) < to_storage_bound(&later));
        assert!(to_storage_bound(&later) < "2015-10-27 10:00:01".to_string());
    }

    #[test]
    fn test_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2015, 10, 27, 7, 0, 0).unwrap();
        let stop = Utc.with_ymd_and_hms(2015, 10, 27, 8, 0, 0).unwrap();
        let window = Window::new(start, stop);
        assert!(window.contains(&start));
        assert!(!window.contains(&stop));
    }

    #[test]
    fn test_post_serializes_storage_timestamp() {
        let post = Post {
            id: 42,
            author_id: 7,
            text: "hello".to_string(),
            created_at: from_storage("2015-10-28 14:05:09").unwrap(),
            reply_to_user_id: None,
            reply_to_post_id: None,
            repost_of: None,
        };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["created_at"], "2015-10-28 14:05:09");
        assert!(!post.is_repost());
        assert!(!post.is_reply());
    }
}
