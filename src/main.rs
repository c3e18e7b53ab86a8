mod fincore;
mod table;

use crate::fincore::{Scanner, Status, DIAGNOSTICS};
use crate::table::{Column, ColumnList, Table};
use env_logger::Env;
use log::{debug, error, LevelFilter};
use std::io;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "fincore", about = "Count pages of file contents in core")]
struct Options {
    /// Print sizes in bytes rather than in human readable format
    #[structopt(short, long)]
    bytes: bool,

    /// Don't print headings
    #[structopt(short, long)]
    noheadings: bool,

    /// Output columns, comma separated (PAGES, SIZE, FILE)
    #[structopt(short, long)]
    output: Option<ColumnList>,

    /// Use raw output format
    #[structopt(short, long)]
    raw: bool,

    /// Target files
    #[structopt(parse(from_os_str), required = true)]
    files: Vec<PathBuf>,
}

/// Scans `files` in order, adding a row for each measured file.
/// Returns false if any file failed.
fn scan_all(scanner: &mut Scanner, files: &[PathBuf], table: &mut Table) -> bool {
    let mut ok = true;

    for file in files {
        let result = scanner.scan(file);
        match result.status {
            Status::Ok => table.add(&result),
            Status::Ignored => debug!("{}: ignoring directory", file.display()),
            Status::Failed => ok = false,
        }
    }

    ok
}

/// Per-file diagnostics stay visible whatever level `env` asks for.
fn logger(env: Env<'_>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(env);
    builder
        .format_timestamp(None)
        .filter_module(DIAGNOSTICS, LevelFilter::Warn);
    builder
}

fn main() {
    logger(Env::default().default_filter_or("info")).init();

    let opt = Options::from_args();

    let page_size = match fincore::page_size() {
        Ok(page_size) => page_size,
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    };

    let columns = opt
        .output
        .map(|ColumnList(columns)| columns)
        .unwrap_or_else(|| Column::DEFAULT.to_vec());
    let mut table = Table::new(columns)
        .bytes(opt.bytes)
        .headings(!opt.noheadings)
        .raw(opt.raw);

    let mut scanner = Scanner::new(page_size);
    let ok = scan_all(&mut scanner, &opt.files, &mut table);

    let stdout = io::stdout();
    if let Err(err) = table.print(&mut stdout.lock()) {
        error!("failed to write output: {}", err);
        process::exit(1);
    }

    if !ok {
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Log, Metadata};
    use std::fs;
    use tempfile::TempDir;

    fn render(table: &Table) -> String {
        let mut out = Vec::new();
        table.print(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_logger_keeps_diagnostics() {
        let logger = logger(Env::new().filter_or("FINCORE_TEST_UNSET_LOG", "error")).build();
        let metadata = |target: &'static str| Metadata::builder().level(Level::Warn).target(target).build();

        assert!(logger.enabled(&metadata(DIAGNOSTICS)));
        assert!(!logger.enabled(&metadata("fincore::table")));
    }

    #[test]
    fn test_options_require_file() {
        assert!(Options::from_iter_safe(&["fincore"]).is_err());

        let opt = Options::from_iter_safe(&["fincore", "-b", "-o", "file,pages", "a", "b"]).unwrap();
        assert!(opt.bytes);
        assert_eq!(
            opt.output,
            Some(ColumnList(vec![Column::File, Column::Pages]))
        );
        assert_eq!(opt.files, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn test_options_reject_unknown_column() {
        assert!(Options::from_iter_safe(&["fincore", "-o", "pages,name", "a"]).is_err());
    }

    #[test]
    fn test_failed_file_does_not_stop_others() {
        let page_size = fincore::page_size().unwrap();
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small");
        let empty = dir.path().join("empty");
        let missing = dir.path().join("missing");
        fs::write(&small, vec![1u8; page_size]).unwrap();
        fs::read(&small).unwrap();
        fs::write(&empty, b"").unwrap();

        let mut scanner = Scanner::new(page_size);
        let mut table = Table::new(Column::DEFAULT.to_vec()).bytes(true).raw(true);
        let ok = scan_all(&mut scanner, &[small.clone(), empty.clone(), missing], &mut table);
        assert!(!ok);

        let output = render(&table);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "PAGES SIZE FILE");
        assert_eq!(lines[1], format!("1 {} {}", page_size, small.display()));
        assert_eq!(lines[2], format!("0 0 {}", empty.display()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unmappable_file_does_not_stop_others() {
        let unmappable = match fincore::tests::unmappable_file() {
            Some(path) => path,
            None => return,
        };
        let page_size = fincore::page_size().unwrap();
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good");
        fs::write(&good, vec![7u8; page_size * 2]).unwrap();
        fs::read(&good).unwrap();

        let mut scanner = Scanner::new(page_size);
        let mut table = Table::new(Column::DEFAULT.to_vec())
            .bytes(true)
            .raw(true)
            .headings(false);
        let ok = scan_all(&mut scanner, &[unmappable, good.clone()], &mut table);
        assert!(!ok);
        assert_eq!(
            render(&table),
            format!("2 {} {}\n", page_size * 2, good.display())
        );
    }

    #[test]
    fn test_directory_produces_no_row() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        fs::write(&empty, b"").unwrap();

        let mut scanner = Scanner::new(fincore::page_size().unwrap());
        let mut table = Table::new(vec![Column::File]).headings(false);
        let ok = scan_all(
            &mut scanner,
            &[dir.path().to_path_buf(), empty.clone()],
            &mut table,
        );
        assert!(ok);
        assert_eq!(render(&table), format!("{}\n", empty.display()));
    }
}
