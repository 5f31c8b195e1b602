//! Netscape cookie-file cleanup.
//!
//! Cookies reach us pasted into text boxes, exported by browser extensions
//! or base64-encoded in the environment. yt-dlp is strict about the format,
//! so the text is normalized before it is written to a scratch file that
//! lives exactly as long as one acquisition.

use crate::error::{TubeError, TubeResult};
use base64::Engine;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";
pub const COOKIES_ENV: &str = "YTDLP_COOKIES_B64";

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

fn decode(raw: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(raw) {
        let (text, _) = encoding.decode_without_bom_handling(&raw[bom_len..]);
        return text.into_owned();
    }
    let (text, had_errors) = UTF_8.decode_without_bom_handling(raw);
    if !had_errors {
        return text.into_owned();
    }
    // browser exports on Windows are occasionally cp1252
    WINDOWS_1252.decode_without_bom_handling(raw).0.into_owned()
}

fn is_flag(field: &str) -> bool {
    field.eq_ignore_ascii_case("TRUE") || field.eq_ignore_ascii_case("FALSE")
}

/// Re-join one data line with tabs, or `None` if it is not a cookie
fn normalize_line(line: &str) -> Option<String> {
    let mut fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() < 6 {
        // pasted text often has its tabs turned into spaces
        fields = line.split_whitespace().collect();
    }
    if fields.len() < 6 {
        return None;
    }

    let (head, rest) = fields.split_at(6);
    let [domain, subdomains, path, secure, expiry, name] = head else {
        return None;
    };
    let value = rest.join(" ");

    let valid = !domain.is_empty()
        && is_flag(subdomains)
        && path.starts_with('/')
        && is_flag(secure)
        && expiry.trim_start_matches('-').chars().all(|c| c.is_ascii_digit())
        && !expiry.is_empty()
        && !name.is_empty();
    if !valid {
        return None;
    }

    let subdomains = subdomains.to_uppercase();
    let secure = secure.to_uppercase();
    let parts: [&str; 7] = [domain, &subdomains, path, &secure, expiry, name, value.trim()];
    Some(parts.join("\t"))
}

/// Normalize raw cookie material into a Netscape document.
///
/// Returns `None` when no usable cookie line survives.
pub fn normalize(raw: &[u8]) -> Option<String> {
    let text = decode(raw).replace("\r\n", "\n").replace('\r', "\n");

    let mut dropped = 0usize;
    let lines: Vec<String> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| line.starts_with(HTTP_ONLY_PREFIX) || !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let normalized = normalize_line(line.trim_start());
            if normalized.is_none() {
                dropped += 1;
            }
            normalized
        })
        .collect();

    if dropped > 0 {
        debug!(dropped, "Dropped malformed cookie lines");
    }
    if lines.is_empty() {
        return None;
    }

    let mut document = String::with_capacity(NETSCAPE_HEADER.len() + lines.len() * 64);
    document.push_str(NETSCAPE_HEADER);
    document.push('\n');
    for line in lines {
        document.push_str(&line);
        document.push('\n');
    }
    Some(document)
}

/// Cookie material decoded from the base64 environment variable
pub fn from_env() -> Option<Vec<u8>> {
    let encoded = std::env::var(COOKIES_ENV).ok()?;
    match decode_base64(&encoded) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Ignoring {}: {}", COOKIES_ENV, e);
            None
        }
    }
}

pub fn decode_base64(encoded: &str) -> TubeResult<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| TubeError::Parse {
            message: format!("Invalid base64 cookies: {}", e),
        })
}

/// Normalized cookies on disk, deleted when dropped
#[derive(Debug)]
pub struct ScopedCookieFile {
    file: NamedTempFile,
}

impl ScopedCookieFile {
    /// Write normalized cookies into `dir` (or the system temp dir).
    ///
    /// No file is created when nothing usable remains.
    pub fn create(raw: &[u8], dir: Option<&Path>) -> TubeResult<Option<Self>> {
        let Some(document) = normalize(raw) else {
            return Ok(None);
        };

        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("cookies-").suffix(".txt");
            b
        };
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(document.as_bytes())?;
        file.flush()?;

        debug!(path = %file.path().display(), "Wrote cookie file");
        Ok(Some(Self { file }))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABBED: &str = ".youtube.com\tTRUE\t/\tTRUE\t1767225600\tVISITOR_INFO1_LIVE\tabc123";

    #[test]
    fn test_whitespace_only_yields_no_file() {
        assert!(normalize(b"  \n\t\r\n  ").is_none());
        let dir = tempfile::tempdir().unwrap();
        let file = ScopedCookieFile::create(b"   \n", Some(dir.path())).unwrap();
        assert!(file.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_well_formed_input_gets_header_and_newline() {
        let doc = normalize(TABBED.as_bytes()).unwrap();
        assert!(doc.starts_with(NETSCAPE_HEADER));
        assert!(doc.ends_with('\n'));
        assert!(doc.contains(TABBED));
    }

    #[test]
    fn test_spaces_are_rejoined_with_tabs() {
        let pasted = "# Netscape HTTP Cookie File\r\n.youtube.com  TRUE  /  TRUE  1767225600  PREF  f6=40000000&hl=en\r\n";
        let doc = normalize(pasted.as_bytes()).unwrap();
        assert_eq!(
            doc,
            "# Netscape HTTP Cookie File\n.youtube.com\tTRUE\t/\tTRUE\t1767225600\tPREF\tf6=40000000&hl=en\n"
        );
    }

    #[test]
    fn test_malformed_lines_dropped_and_http_only_kept() {
        let input = format!(
            "garbage line\n{}\n#HttpOnly_.youtube.com\tTRUE\t/\tTRUE\t0\tSID\tx\n.youtube.com\tmaybe\t/\tTRUE\t0\tBAD\ty\n",
            TABBED
        );
        let doc = normalize(input.as_bytes()).unwrap();
        let lines: Vec<&str> = doc.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("#HttpOnly_.youtube.com"));
        assert!(!doc.contains("BAD"));
    }

    #[test]
    fn test_utf16_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in TABBED.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let doc = normalize(&bytes).unwrap();
        assert!(doc.contains("VISITOR_INFO1_LIVE"));
    }

    #[test]
    fn test_scoped_file_removed_on_drop() {
        let file = ScopedCookieFile::create(TABBED.as_bytes(), None)
            .unwrap()
            .unwrap();
        let path = file.path().to_path_buf();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with(NETSCAPE_HEADER));
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_decode_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(TABBED);
        let wrapped = format!("{}\n{}", &encoded[..10], &encoded[10..]);
        assert_eq!(decode_base64(&wrapped).unwrap(), TABBED.as_bytes());
        assert!(decode_base64("***").is_err());
    }
}
