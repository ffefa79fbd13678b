//! Column-aligned table output with box-drawing borders.

use colored::Colorize;

/// Rows of cells under fixed headers.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row. Missing cells render empty; extra cells are dropped.
    pub fn add_row(&mut self, cells: Vec<String>) {
        let mut row = cells;
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                self.rows
                    .iter()
                    .map(|r| r[i].chars().count())
                    .fold(h.chars().count(), usize::max)
            })
            .collect()
    }

    fn line(widths: &[usize], cells: &[String], bold: bool) -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| {
                let text = format!("{cell:<w$}");
                if bold {
                    format!(" {} ", text.bold())
                } else {
                    format!(" {text} ")
                }
            })
            .collect();
        format!("\u{2502}{}\u{2502}", padded.join("\u{2502}"))
    }

    fn rule(widths: &[usize], left: char, mid: char, right: char) -> String {
        let segments: Vec<String> = widths.iter().map(|w| "\u{2500}".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&mid.to_string()))
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let mut lines = vec![
            Self::rule(&widths, '\u{250c}', '\u{252c}', '\u{2510}'),
            Self::line(&widths, &self.headers, true),
            Self::rule(&widths, '\u{251c}', '\u{253c}', '\u{2524}'),
        ];
        lines.extend(self.rows.iter().map(|r| Self::line(&widths, r, false)));
        lines.push(Self::rule(&widths, '\u{2514}', '\u{2534}', '\u{2518}'));
        lines.join("\n")
    }

    pub fn print(&self) {
        println!("{}", self.render());
    }
}
