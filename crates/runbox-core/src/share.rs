//! Share links: a program and its language packed into a URL.
//!
//! The payload is the program's JSON, percent-encoded the way a browser's
//! `encodeURIComponent` does it, then standard base64. The web app reads and
//! writes the same format.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use url::Url;

/// Query parameter carrying the payload.
pub const SHARE_PARAM: &str = "share";

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Shared program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePayload {
    pub language: String,
    pub code: String,
}

/// Share link error.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Share payload is not valid base64")]
    Base64,
    #[error("Share payload is not valid UTF-8")]
    Utf8,
    #[error("Share payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Share payload has no language or no code")]
    Empty,
    #[error("URL has no `{SHARE_PARAM}` parameter")]
    MissingParam,
}

impl SharePayload {
    /// Create a payload.
    #[must_use]
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }

    /// Encode as base64 of the percent-encoded JSON.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, ShareError> {
        let json = serde_json::to_string(self)?;
        let escaped = utf8_percent_encode(&json, URI_COMPONENT).to_string();
        Ok(STANDARD.encode(escaped))
    }

    /// Build `<origin>?share=<payload>`, escaping the payload for the query.
    ///
    /// # Errors
    /// Returns error if `origin` is not a URL or serialization fails.
    pub fn to_url(&self, origin: &str) -> Result<String, ShareError> {
        let mut url = Url::parse(origin)?;
        url.query_pairs_mut().append_pair(SHARE_PARAM, &self.encode()?);
        Ok(url.into())
    }

    /// Decode a share payload.
    ///
    /// Accepts standard or URL-safe base64, padded or not, over JSON that is
    /// either percent-encoded or plain. Spaces are read as `+`, which is what
    /// an unescaped `+` in a query string turns into.
    ///
    /// # Errors
    /// Returns error if the text is not base64 JSON or a field is empty.
    pub fn decode(encoded: &str) -> Result<Self, ShareError> {
        let encoded = encoded.trim().replace(' ', "+");
        let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(&encoded).ok())
            .ok_or(ShareError::Base64)?;

        let json = if bytes.first() == Some(&b'%') {
            percent_decode(&bytes)
                .decode_utf8()
                .map_err(|_| ShareError::Utf8)?
                .into_owned()
        } else {
            String::from_utf8(bytes).map_err(|_| ShareError::Utf8)?
        };

        let payload: Self = serde_json::from_str(&json)?;
        if payload.language.is_empty() || payload.code.is_empty() {
            return Err(ShareError::Empty);
        }
        Ok(payload)
    }

    /// Extract and decode the payload from a full share URL.
    ///
    /// # Errors
    /// Returns error if the URL does not parse, has no share parameter, or the
    /// parameter does not decode.
    pub fn from_url(url: &str) -> Result<Self, ShareError> {
        let url = Url::parse(url)?;
        let (_, encoded) = url
            .query_pairs()
            .find(|(key, _)| key == SHARE_PARAM)
            .ok_or(ShareError::MissingParam)?;
        Self::decode(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_like_the_web_app() {
        let payload = SharePayload::new("python", "print(1)");
        assert_eq!(
            payload.encode().unwrap(),
            "JTdCJTIybGFuZ3VhZ2UlMjIlM0ElMjJweXRob24lMjIlMkMlMjJjb2RlJTIyJTNBJTIycHJpbnQoMSklMjIlN0Q="
        );
    }

    #[test]
    fn test_url_roundtrip() {
        let payload = SharePayload::new("python", "name = input()\nprint(f\"hi {name}\")\n");
        let url = payload.to_url("https://run.example.com").unwrap();
        assert!(url.starts_with("https://run.example.com/?share="));
        let (_, escaped) = url.split_once("?share=").unwrap();
        assert!(!escaped.contains(['+', '/', '=']));
        assert_eq!(SharePayload::from_url(&url).unwrap(), payload);
    }

    #[test]
    fn test_reads_web_app_link() {
        // `btoa(encodeURIComponent(JSON.stringify(payload)))`, pasted unescaped.
        let url = "https://app.example.com?share=\
                   JTdCJTIybGFuZ3VhZ2UlMjIlM0ElMjJjJTIyJTJDJTIyY29kZSUyMiUzQSUyMmludCUyMG1h\
                   aW4oKSU3QnJldHVybiUyMDAlM0IlN0QlMjIlN0Q=";
        let payload = SharePayload::from_url(url).unwrap();
        assert_eq!(payload, SharePayload::new("c", "int main(){return 0;}"));
    }

    #[test]
    fn test_reads_percent_escaped_padding() {
        let url = "https://app.example.com/?share=eyJsYW5ndWFnZSI6ImdvIiwiY29kZSI6IngifQ%3D%3D";
        let payload = SharePayload::from_url(url).unwrap();
        assert_eq!(payload, SharePayload::new("go", "x"));
    }

    #[test]
    fn test_unescaped_plus_survives_query_decoding() {
        let url = "https://app.example.com/?theme=dark&share=\
                   eyJsYW5ndWFnZSI6InJ1YnkiLCJjb2RlIjoiMSA+Pj4gMiA/Pz8gMyJ9#top";
        let payload = SharePayload::from_url(url).unwrap();
        assert_eq!(payload.code, "1 >>> 2 ??? 3");
    }

    #[test]
    fn test_accepts_url_safe_alphabet() {
        let encoded = URL_SAFE_NO_PAD.encode(r#"{"language":"ruby","code":"1 >>> 2 ??? 3"}"#);
        let payload = SharePayload::decode(&encoded).unwrap();
        assert_eq!(payload.language, "ruby");
    }

    #[test]
    fn test_rejects_empty_fields() {
        let encoded = STANDARD.encode(br#"{"language":"go","code":""}"#);
        assert!(matches!(SharePayload::decode(&encoded), Err(ShareError::Empty)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(SharePayload::decode("***"), Err(ShareError::Base64)));
        let not_json = STANDARD.encode(b"hello");
        assert!(matches!(SharePayload::decode(&not_json), Err(ShareError::Json(_))));
        assert!(matches!(
            SharePayload::from_url("https://run.example.com/?theme=dark"),
            Err(ShareError::MissingParam)
        ));
        assert!(matches!(
            SharePayload::from_url("not a url"),
            Err(ShareError::InvalidUrl(_))
        ));
    }
}
