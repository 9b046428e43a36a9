use std::fmt;

use serde::{Deserialize, Serialize};

/// Header keywords that mark a company-name column.
pub const NAME_KEYWORDS: &[&str] = &["nome", "empresa", "razão"];
/// Header keywords that mark a tax-id column.
pub const ID_KEYWORDS: &[&str] = &["cnpj", "documento"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.is_empty(),
            CellValue::Number(_) => false,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(value) => write!(f, "{value}"),
            CellValue::Text(text) => write!(f, "{text}"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// Parsed spreadsheet content: unique headers plus one value vector per row,
/// each aligned with `headers`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetData {
    pub headers: Vec<String>,
    pub records: Vec<Vec<CellValue>>,
}

impl SheetData {
    pub fn new(headers: Vec<String>, records: Vec<Vec<CellValue>>) -> Self {
        Self { headers, records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Enrichment {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Pending => "pending",
            RowStatus::Processing => "processing",
            RowStatus::Done => "done",
            RowStatus::Error => "error",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enrichment lifecycle of a row. The enrichment payload only exists once the
/// row is done; a failed row keeps the failure message for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowState {
    #[default]
    Pending,
    Processing,
    Done(Enrichment),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<CellValue>,
    pub state: RowState,
}

impl Row {
    pub fn pending(values: Vec<CellValue>) -> Self {
        Self {
            values,
            state: RowState::Pending,
        }
    }

    pub fn status(&self) -> RowStatus {
        match self.state {
            RowState::Pending => RowStatus::Pending,
            RowState::Processing => RowStatus::Processing,
            RowState::Done(_) => RowStatus::Done,
            RowState::Error(_) => RowStatus::Error,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match &self.state {
            RowState::Done(enrichment) => Some(enrichment.text.as_str()),
            _ => None,
        }
    }

    pub fn sources(&self) -> Option<&[String]> {
        match &self.state {
            RowState::Done(enrichment) => Some(enrichment.sources.as_slice()),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            RowState::Error(message) => Some(message.as_str()),
            _ => None,
        }
    }

    /// Cell at `index` coerced to text; missing cells read as empty.
    pub fn text(&self, index: usize) -> String {
        self.values
            .get(index)
            .map(|value| value.to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ProcessingStats {
    pub total: usize,
    pub processed: usize,
    pub errors: usize,
}

impl ProcessingStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            errors: 0,
        }
    }

    pub fn completed(&self) -> usize {
        self.processed + self.errors
    }

    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed() == self.total
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed() * 100) / self.total).min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ColumnSelection {
    pub name_column: Option<String>,
    pub id_column: Option<String>,
}

impl ColumnSelection {
    /// Picks the first header containing a name-like keyword and the first
    /// containing an id-like keyword, case-insensitively.
    pub fn detect(headers: &[String]) -> Self {
        Self {
            name_column: find_header(headers, NAME_KEYWORDS),
            id_column: find_header(headers, ID_KEYWORDS),
        }
    }
}

fn find_header(headers: &[String], keywords: &[&str]) -> Option<String> {
    headers
        .iter()
        .find(|header| {
            let lower = header.to_lowercase();
            keywords.iter().any(|keyword| lower.contains(keyword))
        })
        .cloned()
}
