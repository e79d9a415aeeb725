//! Deep links and the `/start` parameter convention.
//!
//! A start parameter is either `verify_<token>` or the URL-safe base64
//! (unpadded) encoding of a file handle.

use crate::model::FileHandle;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Prefix marking a verification token in a start parameter
pub const VERIFY_PREFIX: &str = "verify_";

/// Decoded `/start` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartParam {
    /// Redeem a verification token
    Verify(String),
    /// Request a shared file
    File(FileHandle),
}

impl StartParam {
    /// Parse a raw start parameter; `None` for empty or undecodable input
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(token) = raw.strip_prefix(VERIFY_PREFIX) {
            return Some(Self::Verify(token.to_string()));
        }
        decode_handle(raw).map(Self::File)
    }
}

/// Encode a file handle for use in a link
#[must_use]
pub fn encode_handle(handle: &FileHandle) -> String {
    URL_SAFE_NO_PAD.encode(handle.as_str())
}

/// Decode a link parameter back into a file handle. Padding is tolerated.
#[must_use]
pub fn decode_handle(encoded: &str) -> Option<FileHandle> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .ok()?;
    let raw = String::from_utf8(bytes).ok()?;
    FileHandle::parse(&raw)
}

/// Builds `t.me` deep links for one bot
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    bot_username: String,
}

impl LinkBuilder {
    /// Links pointing at `@bot_username`
    #[must_use]
    pub fn new(bot_username: impl Into<String>) -> Self {
        Self {
            bot_username: bot_username.into().trim_start_matches('@').to_string(),
        }
    }

    /// Sharing link for a stored file
    #[must_use]
    pub fn file_link(&self, handle: &FileHandle) -> String {
        self.start_link(&encode_handle(handle))
    }

    /// Verification link for a token
    #[must_use]
    pub fn verification_link(&self, token: &str) -> String {
        self.start_link(&format!("{VERIFY_PREFIX}{token}"))
    }

    fn start_link(&self, param: &str) -> String {
        format!("https://t.me/{}?start={param}", self.bot_username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_prefix_wins() {
        assert_eq!(
            StartParam::parse("verify_abc"),
            Some(StartParam::Verify("abc".to_string()))
        );
    }

    #[test]
    fn test_file_param_decodes() {
        let handle = FileHandle::generate();
        let encoded = encode_handle(&handle);
        assert!(!encoded.contains('='));
        assert_eq!(StartParam::parse(&encoded), Some(StartParam::File(handle)));
    }

    #[test]
    fn test_padded_param_is_accepted() {
        let handle = FileHandle::parse("abcd").unwrap_or_else(FileHandle::generate);
        let padded = base64::engine::general_purpose::URL_SAFE.encode(handle.as_str());
        assert!(padded.ends_with('='));
        assert_eq!(decode_handle(&padded), Some(handle));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(StartParam::parse(""), None);
        assert_eq!(StartParam::parse("   "), None);
        assert_eq!(StartParam::parse("!!!"), None);
        // Decodes, but not to a valid handle
        let encoded = URL_SAFE_NO_PAD.encode("../etc/passwd");
        assert_eq!(StartParam::parse(&encoded), None);
    }

    #[test]
    fn test_links() {
        let links = LinkBuilder::new("@RelayBot");
        assert_eq!(
            links.verification_link("tok"),
            "https://t.me/RelayBot?start=verify_tok"
        );
        let handle = FileHandle::generate();
        let link = links.file_link(&handle);
        assert!(link.starts_with("https://t.me/RelayBot?start="));
        let param = link.rsplit('=').next().unwrap_or_default();
        assert_eq!(decode_handle(param), Some(handle));
    }
}
