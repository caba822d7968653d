//! Destination file name sanitization
//!
//! Maps a `/`-delimited relative path onto a name the destination drive
//! accepts. `/` is always a path separator here, never a literal.
//!
//! Defaults follow the OneDrive/SharePoint restrictions:
//! <https://support.microsoft.com/en-us/office/restrictions-and-limitations-in-onedrive-and-sharepoint-64883a5d-228e-48f5-b3d2-eb39e07630fa>

use std::fmt;

use crate::error::NameError;

/// Maximum path length accepted by the destination
///
/// Counted in characters (Unicode scalar values), not UTF-8 bytes: a path of
/// 300 `é` is 300 long here although it takes 600 bytes.
pub const MAX_PATH_CHARS: usize = 400;

/// Characters replaced with `REPLACEMENT_CHAR` (the separator is not one of them)
pub const ILLEGAL_CHARS: &[char] = &['"', '*', ':', '<', '>', '?', '\\', '|'];

pub const REPLACEMENT_CHAR: char = '_';

/// Whole-segment names the destination refuses, compared case-insensitively
pub const RESERVED_SEGMENTS: &[&str] = &[
    ".lock",
    "CON",
    "PRN",
    "AUX",
    "NUL",
    "COM0",
    "COM1",
    "COM2",
    "COM3",
    "COM4",
    "COM5",
    "COM6",
    "COM7",
    "COM8",
    "COM9",
    "LPT0",
    "LPT1",
    "LPT2",
    "LPT3",
    "LPT4",
    "LPT5",
    "LPT6",
    "LPT7",
    "LPT8",
    "LPT9",
    "_vti_",
    "desktop.ini",
];

/// Substrings the final path segment may not contain anywhere
pub const FORBIDDEN_FILE_NAME_SUBSTRINGS: &[&str] = &["~$", "_vti_"];

/// A path that satisfies every destination naming rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedName(String);

impl SanitizedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Path segments in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SanitizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SanitizedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Naming rules of one destination provider
///
/// Built once at startup and shared read-only by every cycle.
#[derive(Debug, Clone)]
pub struct NameSanitizer {
    max_chars: usize,
    illegal_chars: Vec<char>,
    replacement: char,
    reserved_segments: Vec<String>,
    forbidden_substrings: Vec<String>,
}

impl Default for NameSanitizer {
    fn default() -> Self {
        Self::onedrive()
    }
}

impl NameSanitizer {
    /// Create a sanitizer from explicit rules
    pub fn new(
        max_chars: usize,
        illegal_chars: &[char],
        replacement: char,
        reserved_segments: &[&str],
        forbidden_substrings: &[&str],
    ) -> Self {
        Self {
            max_chars,
            illegal_chars: illegal_chars.to_vec(),
            replacement,
            reserved_segments: reserved_segments.iter().map(|s| s.to_string()).collect(),
            forbidden_substrings: forbidden_substrings.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// OneDrive / SharePoint rules
    pub fn onedrive() -> Self {
        Self::new(
            MAX_PATH_CHARS,
            ILLEGAL_CHARS,
            REPLACEMENT_CHAR,
            RESERVED_SEGMENTS,
            FORBIDDEN_FILE_NAME_SUBSTRINGS,
        )
    }

    /// Map `raw` onto a legal destination name
    ///
    /// # Steps
    /// 1. Reject paths longer than the limit
    /// 2. Strip one leading and one trailing `/`
    /// 3. Replace illegal characters
    /// 4. Reject reserved segment names (checked on the untouched input)
    /// 5. Reject forbidden substrings in the final segment of the result
    ///
    /// Pure and deterministic: equal input gives equal output or equal error.
    pub fn sanitize(&self, raw: &str) -> Result<SanitizedName, NameError> {
        let len = raw.chars().count();
        if len > self.max_chars {
            return Err(NameError::TooLong {
                len,
                limit: self.max_chars,
            });
        }

        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let replaced: String = trimmed
            .chars()
            .map(|c| {
                if self.illegal_chars.contains(&c) {
                    self.replacement
                } else {
                    c
                }
            })
            .collect();

        if let Some(segment) = raw.split('/').find(|segment| self.is_reserved(segment)) {
            return Err(NameError::ReservedSegment {
                segment: segment.to_string(),
                path: raw.to_string(),
            });
        }

        // Checked on the result: the returned name never carries a forbidden substring
        let file_name = replaced.rsplit('/').next().unwrap_or(&replaced);
        if let Some(pattern) = self
            .forbidden_substrings
            .iter()
            .find(|pattern| file_name.contains(pattern.as_str()))
        {
            return Err(NameError::ForbiddenSubstring {
                file_name: file_name.to_string(),
                pattern: pattern.clone(),
            });
        }

        Ok(SanitizedName(replaced))
    }

    fn is_reserved(&self, segment: &str) -> bool {
        self.reserved_segments
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(segment))
    }
}
