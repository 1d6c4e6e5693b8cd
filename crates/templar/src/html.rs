//! Rendered output with bookmark substitution.
//!
//! Every render returns an [`HtmlTemplate`]. Besides exposing the text it
//! supports a last-mile substitution pass: literal bookmarks such as
//! `@page_title@` are replaced wherever they occur.
//!
//! ```rust
//! use templar::HtmlTemplate;
//!
//! let mut page = HtmlTemplate::new("<h1>@title@</h1><p>@count@ items</p>");
//! page.substitute("@title@", "Inbox");
//! page.substitute_int("@count@", 3);
//! assert_eq!(page.html(), "<h1>Inbox</h1><p>3 items</p>");
//! ```

use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use chrono::NaiveDate;

use crate::format::format_date;

/// Pattern used by [`HtmlTemplate::substitute_date`].
pub const BOOKMARK_DATE_PATTERN: &str = "%d/%m/%Y";

/// The text produced by a render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HtmlTemplate {
    html: String,
}

impl HtmlTemplate {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    /// Read a template file, normalizing line endings to `\r\n`.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    /// Read from any reader, normalizing line endings to `\r\n`.
    pub fn from_reader<R: Read>(reader: R) -> io::Result<Self> {
        let mut html = String::new();
        for line in BufReader::new(reader).lines() {
            html.push_str(&line?);
            html.push_str("\r\n");
        }
        Ok(Self { html })
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn into_string(self) -> String {
        self.html
    }

    /// Replace every occurrence of `bookmark` with `value`.
    ///
    /// An empty bookmark leaves the text untouched.
    pub fn substitute(&mut self, bookmark: &str, value: &str) {
        if bookmark.is_empty() || !self.html.contains(bookmark) {
            return;
        }
        self.html = self.html.replace(bookmark, value);
    }

    pub fn substitute_int(&mut self, bookmark: &str, value: i64) {
        self.substitute(bookmark, &value.to_string());
    }

    /// Replace `bookmark` with `date` formatted as `dd/mm/yyyy`, or with
    /// nothing when `date` is `None`.
    pub fn substitute_date(&mut self, bookmark: &str, date: Option<NaiveDate>) {
        let value = date
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .and_then(|dt| format_date(&dt, BOOKMARK_DATE_PATTERN))
            .unwrap_or_default();
        self.substitute(bookmark, &value);
    }
}

impl fmt::Display for HtmlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.html)
    }
}

impl From<String> for HtmlTemplate {
    fn from(html: String) -> Self {
        Self::new(html)
    }
}

impl From<HtmlTemplate> for String {
    fn from(template: HtmlTemplate) -> Self {
        template.html
    }
}
