use crate::fincore::ScanResult;
use std::io::{self, Write};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Pages,
    Size,
    File,
}

impl Column {
    pub const DEFAULT: [Column; 3] = [Column::Pages, Column::Size, Column::File];

    pub fn name(self) -> &'static str {
        match self {
            Column::Pages => "PAGES",
            Column::Size => "SIZE",
            Column::File => "FILE",
        }
    }

    fn right_aligned(self) -> bool {
        !matches!(self, Column::File)
    }
}

impl FromStr for Column {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::DEFAULT
            .iter()
            .copied()
            .find(|column| column.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown column: {}", s))
    }
}

/// Comma separated column list, e.g. `pages,file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnList(pub Vec<Column>);

impl FromStr for ColumnList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let columns = s
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Column::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err("no columns specified".to_string());
        }
        Ok(ColumnList(columns))
    }
}

/// Formats `bytes` with a one-letter binary suffix, e.g. `0B`, `4K`, `1.5M`.
pub fn human_size(bytes: u64) -> String {
    const LETTERS: [char; 7] = ['B', 'K', 'M', 'G', 'T', 'P', 'E'];

    let exp = (1..=6usize)
        .map(|i| i * 10)
        .find(|&shift| bytes < 1u64 << shift)
        .unwrap_or(70)
        - 10;

    if exp == 0 {
        return format!("{}B", bytes);
    }

    let suffix = LETTERS[exp / 10];
    let mut dec = bytes >> exp;
    let mut frac = bytes & ((1u64 << exp) - 1);

    if frac != 0 {
        // one decimal digit, rounded
        frac = ((frac >> (exp - 10)) + 50) / 100;
        if frac == 10 {
            dec += 1;
            frac = 0;
        }
    }

    if frac != 0 {
        format!("{}.{}{}", dec, frac, suffix)
    } else {
        format!("{}{}", dec, suffix)
    }
}

pub struct Table {
    columns: Vec<Column>,
    bytes: bool,
    headings: bool,
    raw: bool,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Table {
        Table {
            columns,
            bytes: false,
            headings: true,
            raw: false,
            rows: Vec::new(),
        }
    }

    /// Print sizes as exact byte counts.
    pub fn bytes(mut self, bytes: bool) -> Table {
        self.bytes = bytes;
        self
    }

    pub fn headings(mut self, headings: bool) -> Table {
        self.headings = headings;
        self
    }

    /// Separate cells by a single space without alignment.
    pub fn raw(mut self, raw: bool) -> Table {
        self.raw = raw;
        self
    }

    pub fn add(&mut self, result: &ScanResult) {
        let row = self
            .columns
            .iter()
            .map(|column| match column {
                Column::Pages => result.resident_pages.to_string(),
                Column::Size if self.bytes => result.size.to_string(),
                Column::Size => human_size(result.size),
                Column::File => result.path.display().to_string(),
            })
            .collect();
        self.rows.push(row);
    }

    pub fn print<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let header: Vec<String> = self
            .columns
            .iter()
            .map(|column| column.name().to_string())
            .collect();
        let mut lines: Vec<&[String]> = Vec::with_capacity(self.rows.len() + 1);
        if self.headings {
            lines.push(&header);
        }
        lines.extend(self.rows.iter().map(Vec::as_slice));

        let widths: Vec<usize> = (0..self.columns.len())
            .map(|i| {
                lines
                    .iter()
                    .map(|cells| cells[i].chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        for cells in lines {
            writeln!(out, "{}", self.format_line(cells, &widths))?;
        }
        Ok(())
    }

    fn format_line(&self, cells: &[String], widths: &[usize]) -> String {
        if self.raw {
            return cells.join(" ");
        }

        let last = cells.len().saturating_sub(1);
        cells
            .iter()
            .zip(self.columns.iter().zip(widths))
            .enumerate()
            .map(|(i, (cell, (column, &width)))| {
                if column.right_aligned() {
                    format!("{:>width$}", cell, width = width)
                } else if i == last {
                    cell.clone()
                } else {
                    format!("{:<width$}", cell, width = width)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
