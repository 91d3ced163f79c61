use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Datelike;

use crate::error::{Result, VodError};
use crate::extract::Extracted;
use crate::helpers::sanitize_filename;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Year,
    Month,
    MonthName,
    Day,
    Date,
    Time,
    Title,
    OriginalName,
}

impl Placeholder {
    pub const ALL: [Placeholder; 8] = [
        Placeholder::Year,
        Placeholder::Month,
        Placeholder::MonthName,
        Placeholder::Day,
        Placeholder::Date,
        Placeholder::Time,
        Placeholder::Title,
        Placeholder::OriginalName,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::Year => "year",
            Placeholder::Month => "month",
            Placeholder::MonthName => "month_name",
            Placeholder::Day => "day",
            Placeholder::Date => "date",
            Placeholder::Time => "time",
            Placeholder::Title => "title",
            Placeholder::OriginalName => "original_name",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// A `{placeholder}` template. Unknown placeholders are rejected when parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPattern {
    template: String,
    segments: Vec<Segment>,
    // Rendering used when no time-of-day is known.
    without_time: Vec<Segment>,
}

impl NamingPattern {
    pub fn parse(template: &str) -> Result<Self> {
        let segments = parse_segments(template)?;
        let without_time = if segments.contains(&Segment::Field(Placeholder::Time)) {
            parse_segments(&drop_time(template))?
        } else {
            segments.clone()
        };

        Ok(Self { template: template.to_string(), segments, without_time })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.segments.contains(&Segment::Field(placeholder))
    }

    pub fn render(&self, values: &NamingValues) -> String {
        let segments = if values.time.is_some() { &self.segments } else { &self.without_time };

        segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.as_str(),
                Segment::Field(p) => values.get(*p).unwrap_or_default(),
            })
            .collect()
    }
}

impl FromStr for NamingPattern {
    type Err = VodError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NamingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

fn parse_segments(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(VodError::Config(format!("unclosed placeholder in pattern {template:?}")));
                        }
                        Some(c) => name.push(c),
                    }
                }
                let placeholder = Placeholder::from_name(&name).ok_or_else(|| {
                    VodError::Config(format!("unknown placeholder {{{name}}} in pattern {template:?}"))
                })?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(placeholder));
            }
            '}' => return Err(VodError::Config(format!("stray '}}' in pattern {template:?}"))),
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn drop_time(template: &str) -> String {
    let stripped = template
        .replace("{time} - ", "")
        .replace(" - {time}", "")
        .replace("{time}", "");
    let collapsed = stripped.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
    collapsed.trim_matches(|c| c == ' ' || c == '-').to_string()
}

/// Placeholder values for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingValues {
    pub year: String,
    pub month: String,
    pub month_name: String,
    pub day: String,
    pub date: String,
    pub time: Option<String>,
    pub title: String,
    pub original_name: String,
}

impl NamingValues {
    pub fn new(extracted: &Extracted, original_name: &str) -> Self {
        let date = extracted.date;
        Self {
            year: date.year().to_string(),
            month: format!("{:02}", date.month()),
            month_name: date.format("%b").to_string().to_lowercase(),
            day: format!("{:02}", date.day()),
            date: date.format("%Y-%m-%d").to_string(),
            time: extracted.time.map(|t| t.format("%H_%M_%S").to_string()),
            title: extracted.title.clone(),
            original_name: original_name.to_string(),
        }
    }

    fn get(&self, placeholder: Placeholder) -> Option<&str> {
        let value = match placeholder {
            Placeholder::Year => &self.year,
            Placeholder::Month => &self.month,
            Placeholder::MonthName => &self.month_name,
            Placeholder::Day => &self.day,
            Placeholder::Date => &self.date,
            Placeholder::Time => return self.time.as_deref(),
            Placeholder::Title => &self.title,
            Placeholder::OriginalName => &self.original_name,
        };
        Some(value)
    }
}

/// Folder and file patterns that together place a file under the root.
#[derive(Debug, Clone)]
pub struct Naming {
    pub folder: NamingPattern,
    pub file: NamingPattern,
}

impl Naming {
    pub fn new(folder: &str, file: &str) -> Result<Self> {
        if file.contains('/') || file.contains('\\') {
            return Err(VodError::Config(format!("file name pattern {file:?} may not contain path separators")));
        }
        let file = NamingPattern::parse(file)?;
        if file.template().trim().is_empty() {
            return Err(VodError::Config("file name pattern is empty".to_string()));
        }

        Ok(Self { folder: NamingPattern::parse(folder)?, file })
    }

    pub fn folder_path(&self, root: &Path, values: &NamingValues) -> PathBuf {
        let rendered = self.folder.render(values);
        rendered
            .split(['/', '\\'])
            .filter(|part| !part.trim().is_empty())
            .fold(root.to_path_buf(), |path, part| path.join(sanitize_filename(part)))
    }

    pub fn file_name(&self, values: &NamingValues, extension: &str) -> String {
        format!("{}.{}", sanitize_filename(&self.file.render(values)), extension)
    }

    pub fn destination(&self, root: &Path, values: &NamingValues, extension: &str) -> PathBuf {
        self.folder_path(root, values).join(self.file_name(values, extension))
    }
}
