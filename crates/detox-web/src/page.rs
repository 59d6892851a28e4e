// crates/detox-web/src/page.rs
// ============================================================================
// Module: HTML Shell
// Description: Initial page template with `${PLACEHOLDER}` substitution.
// Purpose: Seed the client with the resolved cycle on first load.
// Dependencies: detox-core
// ============================================================================

//! ## Overview
//! The shell is plain text with `${NAME}` markers. Rendering replaces each
//! known marker with the HTML-escaped cycle header value; unknown markers are
//! left untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::path::Path;

use detox_core::CycleHeader;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Shell embedded at build time.
const EMBEDDED_PAGE: &str = include_str!("../assets/detox.html");

/// Largest template accepted from disk.
const MAX_TEMPLATE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Template
// ============================================================================

/// HTML shell template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTemplate {
    /// Raw template text.
    source: String,
}

impl PageTemplate {
    /// Returns the embedded shell.
    #[must_use]
    pub fn embedded() -> Self {
        Self::from_source(EMBEDDED_PAGE)
    }

    /// Wraps template text.
    #[must_use]
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Loads a template from disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is unreadable, too large, or not UTF-8.
    pub fn load(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        if metadata.len() > MAX_TEMPLATE_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "page template too large"));
        }
        let source = fs::read_to_string(path)?;
        Ok(Self::from_source(source))
    }

    /// Substitutes the header values into the template.
    ///
    /// Markers are expanded in one pass over the source; substituted values
    /// are never scanned for further markers.
    #[must_use]
    pub fn render(&self, header: &CycleHeader) -> String {
        let mut page = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("${") {
            page.push_str(&rest[.. start]);
            let tail = &rest[start ..];
            let expansion = tail
                .find('}')
                .and_then(|end| marker_value(&tail[2 .. end], header).map(|value| (end, value)));
            match expansion {
                Some((end, value)) => {
                    page.push_str(&value);
                    rest = &tail[end + 1 ..];
                }
                None => {
                    page.push_str("${");
                    rest = &tail[2 ..];
                }
            }
        }
        page.push_str(rest);
        page
    }
}

/// Returns the rendered value of a known marker name.
fn marker_value(name: &str, header: &CycleHeader) -> Option<String> {
    match name {
        "CYCLE_NUMBER" => Some(header.cycle_number.to_string()),
        "PARTITION_ID" => Some(header.partition_id.to_string()),
        "PARTITION" => Some(escape_html(&header.partition)),
        "POLICY_VERSION" => Some(escape_html(&header.policy_version)),
        "COMMENT" => Some(escape_html(&header.comment)),
        "TIME_START" => Some(escape_html(&header.time_start)),
        _ => None,
    }
}

/// Escapes text for HTML element and attribute content.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
