//! Pool key codec
//!
//! A pool key identifies one partition of connections:
//! `encode(instance) :: encode(server) :: (encode(session) | @shared)`.
//! Segments are percent-encoded the way `encodeURIComponent` does, so `:`
//! and `@` never survive encoding. Any separator sequence still present
//! after encoding is escaped as well, which makes the codec injective over
//! arbitrary input strings.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

/// Separator placed between encoded key segments
pub const SEPARATOR: &str = "::";

/// Escaped form of [`SEPARATOR`]
const ESCAPED_SEPARATOR: &str = "%3A%3A";

/// Segment used in place of a session id for shared pools.
///
/// `@` is always escaped by [`encode_segment`], so no session id can
/// encode to this value.
pub const SHARED_SEGMENT: &str = "@shared";

/// Characters left unescaped: alphanumerics and `- _ . ! ~ * ' ( )`
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a single key segment
pub fn encode_segment(segment: &str) -> String {
    let encoded = utf8_percent_encode(segment, SEGMENT).to_string();
    if encoded.contains(SEPARATOR) {
        encoded.replace(SEPARATOR, ESCAPED_SEPARATOR)
    } else {
        encoded
    }
}

/// Encoded identity of a connection pool
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(String);

impl PoolKey {
    /// Build the key for `(instance_id, server_name)` and an optional session.
    ///
    /// `None` selects the shared pool.
    pub fn new(instance_id: &str, server_name: &str, session_id: Option<&str>) -> Self {
        let session = match session_id {
            Some(session_id) => encode_segment(session_id),
            None => SHARED_SEGMENT.to_string(),
        };

        Self(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            encode_segment(instance_id),
            encode_segment(server_name),
            session
        ))
    }

    /// Encoded key string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key names a shared (session-less) pool
    pub fn is_shared(&self) -> bool {
        self.0.ends_with(SHARED_SEGMENT)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a connection tag unique within its pool key
///
/// Combines the instance id, server name, creation time in milliseconds and
/// a random suffix.
pub fn instance_tag(instance_id: &str, server_name: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}-{}",
        encode_segment(instance_id),
        encode_segment(server_name),
        chrono::Utc::now().timestamp_millis(),
        &random[..8]
    )
}

/// Key under which an idle connection is stored in the idle index
pub fn idle_index_key(pool_key: &PoolKey, instance_tag: &str) -> String {
    format!("{}{SEPARATOR}{}", pool_key.as_str(), instance_tag)
}
