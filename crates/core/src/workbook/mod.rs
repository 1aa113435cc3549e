pub mod package;
pub mod xlsx;

use crate::domain::forecast::Cell;
use anyhow::{ensure, Result};

pub const MAX_SHEET_NAME_CHARS: usize = 31;
const FORBIDDEN_SHEET_NAME_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let name = name.into();
        validate_sheet_name(&name)?;
        Ok(Self { name, rows })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> Option<&[Cell]> {
        self.rows.first().map(Vec::as_slice)
    }
}

pub fn validate_sheet_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    ensure!(
        (1..=MAX_SHEET_NAME_CHARS).contains(&len),
        "sheet name must be 1..={MAX_SHEET_NAME_CHARS} characters (got {len}): {name:?}"
    );
    ensure!(
        !name.contains(FORBIDDEN_SHEET_NAME_CHARS),
        "sheet name contains a forbidden character: {name:?}"
    );
    Ok(())
}

/// Ordered sheets keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(Sheet::name).collect()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// Appends a sheet whose name is not taken yet.
    pub fn push_sheet(&mut self, sheet: Sheet) -> Result<()> {
        ensure!(
            self.sheet(&sheet.name).is_none(),
            "duplicate sheet name: {}",
            sheet.name
        );
        self.sheets.push(sheet);
        Ok(())
    }

    pub fn remove_sheet(&mut self, name: &str) -> Option<Sheet> {
        let idx = self.sheets.iter().position(|s| s.name == name)?;
        Some(self.sheets.remove(idx))
    }

    /// Drops any sheet with the same name, then appends `sheet` as the last sheet.
    /// Returns whether an existing sheet was replaced.
    pub fn upsert_sheet(&mut self, sheet: Sheet) -> bool {
        let replaced = self.remove_sheet(&sheet.name).is_some();
        self.sheets.push(sheet);
        replaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(name: &str, value: f64) -> Sheet {
        Sheet::new(
            name,
            vec![vec![Cell::text("temperature")], vec![Cell::Number(value)]],
        )
        .unwrap()
    }

    #[test]
    fn upsert_replaces_same_name_and_keeps_others() {
        let mut wb = Workbook::new();
        assert!(!wb.upsert_sheet(sheet("17-8-25", 1.0)));
        assert!(!wb.upsert_sheet(sheet("18-8-25", 2.0)));
        assert!(wb.upsert_sheet(sheet("18-8-25", 3.0)));

        assert_eq!(wb.sheet_names(), vec!["17-8-25", "18-8-25"]);
        assert_eq!(wb.sheet("18-8-25").unwrap().rows.len(), 2);
        assert_eq!(wb.sheet("18-8-25").unwrap().rows[1][0], Cell::Number(3.0));
        assert_eq!(wb.sheet("17-8-25").unwrap().rows[1][0], Cell::Number(1.0));
    }

    #[test]
    fn replaced_sheet_moves_to_the_end() {
        let mut wb = Workbook::new();
        wb.upsert_sheet(sheet("1-1-25", 1.0));
        wb.upsert_sheet(sheet("2-1-25", 1.0));
        wb.upsert_sheet(sheet("1-1-25", 5.0));
        assert_eq!(wb.sheet_names(), vec!["2-1-25", "1-1-25"]);
    }

    #[test]
    fn rejects_invalid_sheet_names() {
        assert!(Sheet::new("", vec![]).is_err());
        assert!(Sheet::new("a/b", vec![]).is_err());
        assert!(Sheet::new("x".repeat(32), vec![]).is_err());
        assert!(Sheet::new("4-3-25", vec![]).is_ok());
    }

    #[test]
    fn push_rejects_duplicates() {
        let mut wb = Workbook::new();
        wb.push_sheet(sheet("4-3-25", 1.0)).unwrap();
        assert!(wb.push_sheet(sheet("4-3-25", 2.0)).is_err());
    }
}
