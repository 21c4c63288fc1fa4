//! Turn markdown-flavoured AI replies into plain chat text

use crate::error::{Error, Result};
use regex::Regex;

/// Bullet marker used in place of `-` / `*` list items
pub const BULLET: &str = "• ";

pub struct ReplySanitizer {
    code_fence: Regex,
    heading: Regex,
    bullet: Regex,
    blank_lines: Regex,
}

impl ReplySanitizer {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::Config(format!("Invalid sanitizer pattern {}: {}", pattern, e)))
        };
        Ok(Self {
            code_fence: compile(r"(?s)```.*?```")?,
            heading: compile(r"(?m)^[ \t]*#{1,6}[ \t]*")?,
            bullet: compile(r"(?m)^[ \t]*[-*][ \t]+")?,
            blank_lines: compile(r"\n{3,}")?,
        })
    }

    /// Remove code fences and headings, render bullets, collapse blank runs
    pub fn sanitize(&self, reply: &str) -> String {
        let text = reply.replace("\r\n", "\n");
        let text = self.code_fence.replace_all(&text, "");
        let text = self.heading.replace_all(&text, "");
        let text = self.bullet.replace_all(&text, BULLET);
        let text = self.blank_lines.replace_all(&text, "\n\n");
        text.trim().to_string()
    }
}
