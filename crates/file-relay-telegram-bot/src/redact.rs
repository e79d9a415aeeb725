//! Log redaction: bot tokens, storage credentials and shortlink API keys never
//! reach the log sink.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;

/// Compiled `(pattern, replacement)` pairs applied in order
pub struct RedactionPatterns {
    rules: Vec<(Regex, &'static str)>,
}

const RULES: &[(&str, &str)] = &[
    // Bot API URLs embed the token in the path
    (
        r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)",
        "$1[TELEGRAM_TOKEN]$3",
    ),
    (r"([0-9]{8,10}:[A-Za-z0-9_-]{35})", "[TELEGRAM_TOKEN]"),
    (r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+", "$1[TELEGRAM_TOKEN]"),
    (r"R2_ACCESS_KEY_ID=[^\s&]+", "R2_ACCESS_KEY_ID=[MASKED]"),
    (r"R2_SECRET_ACCESS_KEY=[^\s&]+", "R2_SECRET_ACCESS_KEY=[MASKED]"),
    (r"'aws_access_key_id': '[^']*'", "'aws_access_key_id': '[MASKED]'"),
    (r"'aws_secret_access_key': '[^']*'", "'aws_secret_access_key': '[MASKED]'"),
    (r"SHORTLINK_API_KEY=[^\s&]+", "SHORTLINK_API_KEY=[MASKED]"),
    // Shortlink providers take the key as a query parameter
    (r"([?&]api=)[^&\s]+", "${1}[MASKED]"),
];

impl RedactionPatterns {
    /// Compiles every rule
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        let rules = RULES
            .iter()
            .map(|(pattern, replacement)| Ok((Regex::new(pattern)?, *replacement)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Applies every rule to `input`
    pub fn redact(&self, input: &str) -> String {
        self.rules
            .iter()
            .fold(input.to_string(), |acc, (re, replacement)| {
                re.replace_all(&acc, *replacement).into_owned()
            })
    }
}

/// Writer that redacts each buffer before forwarding it
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let redacted = self.patterns.redact(&String::from_utf8_lossy(buf));
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was fully consumed even if the redacted text differs in length
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` wrapping every writer produced by `make_inner`
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> RedactionPatterns {
        RedactionPatterns::new().expect("patterns must compile")
    }

    #[test]
    fn test_redacts_bot_token_in_api_url() {
        let line = "error sending request for url (https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw/getMe )";
        let out = patterns().redact(line);
        assert!(!out.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw"));
        assert!(out.contains("[TELEGRAM_TOKEN]"));
    }

    #[test]
    fn test_redacts_shortlink_api_key() {
        let line = "GET https://aro.li/api?api=secretkey123&url=https%3A%2F%2Ft.me%2Fbot failed";
        let out = patterns().redact(line);
        assert!(!out.contains("secretkey123"));
        assert!(out.contains("?api=[MASKED]&url="));
    }

    #[test]
    fn test_redacts_env_style_credentials() {
        let out = patterns().redact("R2_SECRET_ACCESS_KEY=abc SHORTLINK_API_KEY=def");
        assert_eq!(
            out,
            "R2_SECRET_ACCESS_KEY=[MASKED] SHORTLINK_API_KEY=[MASKED]"
        );
    }

    #[test]
    fn test_writer_reports_original_length() {
        let mut sink = Vec::new();
        let mut writer = RedactingWriter {
            inner: &mut sink,
            patterns: Arc::new(patterns()),
        };
        let input = b"R2_ACCESS_KEY_ID=xyz";
        assert_eq!(writer.write(input).expect("write"), input.len());
        assert_eq!(String::from_utf8_lossy(&sink), "R2_ACCESS_KEY_ID=[MASKED]");
    }
}
