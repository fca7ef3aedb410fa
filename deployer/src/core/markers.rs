//! Marker-delimited sections inside text files the engine shares with others.
//!
//! A section is the inclusive line range from the begin marker to the end
//! marker. Edits never touch text outside that range.

/// Begin/end comment lines for one owner tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionMarkers {
    begin: String,
    end: String,
}

impl SectionMarkers {
    pub fn new(comment_prefix: &str, tag: &str) -> Self {
        Self {
            begin: format!("{comment_prefix} BEGIN deployer {tag}"),
            end: format!("{comment_prefix} END deployer {tag}"),
        }
    }

    pub fn begin(&self) -> &str {
        &self.begin
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// True when the begin marker is already present as a whole line.
    pub fn is_present(&self, text: &str) -> bool {
        text.lines().any(|line| line.trim_end() == self.begin)
    }

    /// Return `text` with a new section appended, or `None` if one exists.
    pub fn append(&self, text: &str, body: &str) -> Option<String> {
        if self.is_present(text) {
            return None;
        }
        let mut out = String::with_capacity(text.len() + body.len() + 64);
        out.push_str(text);
        if !text.is_empty() && !text.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.begin);
        out.push('\n');
        out.push_str(body);
        if !body.is_empty() && !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.end);
        out.push('\n');
        Some(out)
    }

    /// Return `text` with the section removed, or `Ok(None)` if absent.
    ///
    /// A begin marker without a matching end marker is an error; the file is
    /// left for a human rather than guessing where the section stops.
    pub fn remove(&self, text: &str) -> Result<Option<String>, String> {
        let mut out = String::with_capacity(text.len());
        let mut inside = false;
        let mut found = false;
        for line in text.split_inclusive('\n') {
            let bare = line.trim_end_matches(['\n', '\r']).trim_end();
            if !inside && !found && bare == self.begin {
                inside = true;
                found = true;
                continue;
            }
            if inside {
                if bare == self.end {
                    inside = false;
                }
                continue;
            }
            out.push_str(line);
        }
        if inside {
            return Err(format!("section '{}' has no end marker", self.begin));
        }
        Ok(found.then_some(out))
    }

    /// Body between the markers, if the section exists.
    pub fn extract<'a>(&self, text: &'a str) -> Option<&'a str> {
        let start = text.find(&self.begin)?;
        let body_start = start + self.begin.len();
        let body_start = body_start + text[body_start..].find('\n')? + 1;
        let body_len = text[body_start..].find(&self.end)?;
        Some(&text[body_start..body_start + body_len])
    }
}
