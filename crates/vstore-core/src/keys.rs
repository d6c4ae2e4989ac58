//! Key encodings shared by every component.
//!
//! Lock markers live at `{id}#`, root objects at `{id}/root` and uploaded
//! files at `{session_id}/{file_name}`. The trailing separator keeps a prefix
//! listing for `4#` from matching `42#`.

use uuid::Uuid;

use crate::ObjectId;

/// Separator terminating a lock key.
pub const LOCK_KEY_SEPARATOR: char = '#';

/// Suffix of a root object's descriptor key.
pub const OBJECT_KEY_SUFFIX: &str = "/root";

/// Encode the lock key for a root object.
pub fn lock_key(id: ObjectId) -> String {
    format!("{}{}", id, LOCK_KEY_SEPARATOR)
}

/// Decode a lock key back to its root object id.
///
/// Returns `None` for anything `lock_key` would not have produced.
pub fn parse_lock_key(key: &str) -> Option<ObjectId> {
    key.strip_suffix(LOCK_KEY_SEPARATOR).and_then(parse_canonical_id)
}

/// Encode the descriptor key for a root object.
pub fn object_key(id: ObjectId) -> String {
    format!("{}{}", id, OBJECT_KEY_SUFFIX)
}

/// Decode a root object key back to its id.
pub fn parse_object_key(key: &str) -> Option<ObjectId> {
    key.strip_suffix(OBJECT_KEY_SUFFIX).and_then(parse_canonical_id)
}

/// Prefix under which all files of an upload session are stored.
pub fn session_prefix(session_id: Uuid) -> String {
    format!("{}/", session_id)
}

/// Key of a single uploaded file.
pub fn file_key(session_id: Uuid, file_name: &str) -> String {
    format!("{}/{}", session_id, file_name)
}

/// Owning upload session of a file key.
pub fn session_id_of(file_key: &str) -> Option<Uuid> {
    let (session, name) = file_key.split_once('/')?;
    if name.is_empty() {
        return None;
    }
    Uuid::parse_str(session).ok()
}

/// Parse a decimal id without sign or leading zeros, so decoding stays bijective.
fn parse_canonical_id(s: &str) -> Option<ObjectId> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_round_trip() {
        for id in [0u64, 1, 42, 9_007_199_254_740_993, u64::MAX] {
            let key = lock_key(id);
            assert!(key.ends_with('#'));
            assert_eq!(parse_lock_key(&key), Some(id));
        }
    }

    #[test]
    fn test_object_key_round_trip() {
        for id in [0u64, 7, 1_000_000, u64::MAX] {
            assert_eq!(parse_object_key(&object_key(id)), Some(id));
        }
    }

    #[test]
    fn test_rejects_non_canonical_keys() {
        assert_eq!(parse_lock_key("42"), None);
        assert_eq!(parse_lock_key("#"), None);
        assert_eq!(parse_lock_key("+42#"), None);
        assert_eq!(parse_lock_key("042#"), None);
        assert_eq!(parse_lock_key("4 2#"), None);
        assert_eq!(parse_lock_key("42##"), None);
        assert_eq!(parse_lock_key("18446744073709551616#"), None);
        assert_eq!(parse_object_key("42/root/x"), None);
    }

    #[test]
    fn test_session_id_of_file_key() {
        let session = Uuid::new_v4();
        let key = file_key(session, "photo.png");
        assert!(key.starts_with(&session_prefix(session)));
        assert_eq!(session_id_of(&key), Some(session));
        assert_eq!(session_id_of(&format!("{}/", session)), None);
        assert_eq!(session_id_of("not-a-uuid/photo.png"), None);
        assert_eq!(session_id_of("photo.png"), None);
    }
}
