//! Inbound post payloads as delivered by the REST lookups and the streaming feed.
//!
//! Both the platform's native field names (`screen_name`, `user_mentions`,
//! `retweeted_status`, ...) and the shorter normalized names are accepted.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Textual format of `created_at`, e.g. `Wed Oct 28 14:05:09 +0000 2015`
pub const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

// Ids arrive as JSON numbers or as decimal strings depending on the endpoint
mod id_format {
    use serde::{self, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(super) enum NumberOrString {
        Number(i64),
        String(String),
    }

    impl NumberOrString {
        pub(super) fn into_id<E: serde::de::Error>(self) -> Result<i64, E> {
            match self {
                NumberOrString::Number(n) => Ok(n),
                NumberOrString::String(s) => s.trim().parse().map_err(E::custom),
            }
        }
    }

    pub fn serialize<S>(id: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*id)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        NumberOrString::deserialize(deserializer)?.into_id()
    }
}

mod opt_id_format {
    use serde::{self, Deserialize, Deserializer, Serializer};

    use super::id_format::NumberOrString;

    pub fn serialize<S>(id: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match id {
            Some(id) => serializer.serialize_some(id),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<NumberOrString>::deserialize(deserializer)?
            .map(NumberOrString::into_id)
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    #[serde(with = "id_format")]
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_name: Option<String>,
}

impl RawUser {
    /// The name stored for this account: the handle if present, else the display name
    pub fn handle(&self) -> Option<&str> {
        self.screen_name.as_deref().or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHashtag {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUrl {
    #[serde(default)]
    pub expanded_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntities {
    #[serde(default)]
    pub hashtags: Vec<RawHashtag>,
    #[serde(default)]
    pub urls: Vec<RawUrl>,
    #[serde(default, alias = "user_mentions")]
    pub mentions: Vec<RawUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    #[serde(with = "id_format")]
    pub id: i64,
    #[serde(default, alias = "full_text")]
    pub text: String,
    pub created_at: String,
    pub user: RawUser,
    #[serde(default)]
    pub entities: RawEntities,
    #[serde(default, with = "opt_id_format", skip_serializing_if = "Option::is_none")]
    pub in_reply_to_user_id: Option<i64>,
    #[serde(default, alias = "in_reply_to_screen_name", skip_serializing_if = "Option::is_none")]
    pub in_reply_to_name: Option<String>,
    #[serde(default, with = "opt_id_format", skip_serializing_if = "Option::is_none")]
    pub in_reply_to_status_id: Option<i64>,
    #[serde(default, alias = "retweeted_status", skip_serializing_if = "Option::is_none")]
    pub reposted_status: Option<Box<RawPost>>,
}

impl RawPost {
    /// Parse `created_at`, convert to UTC and drop the zone.
    ///
    /// RFC 3339 timestamps are accepted as a fallback.
    pub fn created_at_utc(&self) -> chrono::ParseResult<NaiveDateTime> {
        let raw = self.created_at.trim();
        DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map(|dt| dt.with_timezone(&Utc).naive_utc())
    }

    /// Nesting depth of embedded reposts (0 for an original post)
    pub fn repost_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.reposted_status.as_deref();
        while let Some(inner) = current {
            depth += 1;
            current = inner.reposted_status.as_deref();
        }
        depth
    }
}
