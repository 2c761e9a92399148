use serde::{Deserialize, Serialize};

/// Image post record published after a successful upload.
///
/// Field names are camelCase on the wire: `{ "imageLink": ..., "text": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePost {
    pub image_link: String,
    pub text: String,
}

/// Value stored under an entry key. A plain string for chat messages,
/// a flat record for image posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryValue {
    Text(String),
    ImagePost(ImagePost),
}

impl EntryValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn image_post(image_link: impl Into<String>, text: impl Into<String>) -> Self {
        Self::ImagePost(ImagePost {
            image_link: image_link.into(),
            text: text.into(),
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::ImagePost(_) => None,
        }
    }
}

impl From<&str> for EntryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for EntryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<ImagePost> for EntryValue {
    fn from(post: ImagePost) -> Self {
        Self::ImagePost(post)
    }
}

/// One element of an append-only stream: backend-assigned key plus value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: EntryValue,
}

/// Characters a key or namespace may never contain. They would collide with
/// URL path structure or with the realtime database's own path syntax.
const FORBIDDEN_KEY_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Longest key accepted, in bytes.
pub const MAX_KEY_BYTES: usize = 768;

/// Whether `key` can be used as an entry key or namespace name.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_BYTES
        && !key.chars().any(|c| FORBIDDEN_KEY_CHARS.contains(&c) || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_post_wire_shape() {
        let value = EntryValue::image_post("https://x/y.png", "y.png");
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "imageLink": "https://x/y.png", "text": "y.png" })
        );
    }

    #[test]
    fn plain_text_is_a_bare_string() {
        let json = serde_json::to_string(&EntryValue::text("hello")).unwrap();
        assert_eq!(json, "\"hello\"");
    }

    #[test]
    fn decodes_both_shapes() {
        let text: EntryValue = serde_json::from_str("\"\"").unwrap();
        assert_eq!(text, EntryValue::text(""));

        let post: EntryValue =
            serde_json::from_str(r#"{"imageLink":"https://a/b","text":"b","extra":1}"#).unwrap();
        assert_eq!(post, EntryValue::image_post("https://a/b", "b"));
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(serde_json::from_str::<EntryValue>("42").is_err());
        assert!(serde_json::from_str::<EntryValue>(r#"{"text":"no link"}"#).is_err());
    }

    #[test]
    fn key_validation() {
        assert!(is_valid_key("messages"));
        assert!(is_valid_key("-NxYz09_abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("a.b"));
        assert!(!is_valid_key(&"k".repeat(MAX_KEY_BYTES + 1)));
    }
}
