//! Policy version arithmetic and the replicated version file
//!
//! The GPO version lives both in the directory (`versionNumber`) and in the
//! `Version=` line of `gpt.ini` on the share. Clients compare the two, so
//! they must carry the same value after every update.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::gpo::GpoScope;
use crate::error::{AppError, AppResult};

/// Directory attribute carrying the policy version
pub const VERSION_ATTRIBUTE: &str = "versionNumber";

static VERSION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^([ \t]*version[ \t]*=[ \t]*)([0-9]+)").expect("version pattern is valid")
});

/// Next version after an update to the given scope
pub fn advance(current: u32, scope: GpoScope) -> AppResult<u32> {
    current.checked_add(scope.version_increment()).ok_or_else(|| {
        AppError::InvalidArgument(format!(
            "policy version {} cannot advance for {} scope without overflowing",
            current, scope
        ))
    })
}

/// Parse the directory's textual `versionNumber`; absent counts as 0
pub fn parse_directory_version(value: Option<&str>) -> AppResult<u32> {
    match value.map(str::trim) {
        None | Some("") => Ok(0),
        // The directory stores a signed 32-bit integer.
        Some(v) => v
            .parse::<u32>()
            .or_else(|_| v.parse::<i32>().map(|n| n as u32))
            .map_err(|_| {
                AppError::DirectoryError(format!("{} value '{}' is not a number", VERSION_ATTRIBUTE, v))
            }),
    }
}

/// Encoding a version file was read with, reused when writing it back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// Decode as UTF-8, falling back to Latin-1 for files edited on localized systems
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), TextEncoding::Utf8),
        Err(_) => (
            bytes.iter().map(|&b| char::from(b)).collect(),
            TextEncoding::Latin1,
        ),
    }
}

/// Encode text back into the encoding it was read with
pub fn encode_text(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        // Text decoded as Latin-1 only ever gains ASCII digits.
        TextEncoding::Latin1 => text.chars().map(|c| c as u32 as u8).collect(),
    }
}

/// Read the version recorded in a version file, if any
pub fn read_file_version(contents: &[u8]) -> Option<u32> {
    let (text, _) = decode_text(contents);
    VERSION_LINE
        .captures(&text)
        .and_then(|caps| caps[2].parse().ok())
}

/// Rewrite every `Version=` line of a version file to `version`.
///
/// Other lines, line endings and the file's encoding are kept. Fails if the
/// file has no version line.
pub fn rewrite_version_file(contents: &[u8], version: u32) -> AppResult<Vec<u8>> {
    let (text, encoding) = decode_text(contents);

    if !VERSION_LINE.is_match(&text) {
        return Err(AppError::ShareError(
            "version file has no Version= line".to_string(),
        ));
    }

    let rewritten = VERSION_LINE.replace_all(&text, |caps: &Captures| {
        format!("{}{}", &caps[1], version)
    });

    Ok(encode_text(&rewritten, encoding))
}
