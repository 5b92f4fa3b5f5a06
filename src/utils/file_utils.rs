use glob::glob;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

use super::lines::Line;
use crate::error::{BugreportError, Result};
use crate::models::anr_summary::AnrSummary;

pub const SUMMARY_FILE: &str = "summary.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    Zip,
    Text,
    Unknown,
}

pub fn get_file_type(path: &Path) -> FileType {
    if path.is_dir() {
        return FileType::Directory;
    }
    match get_suffix(path).as_deref() {
        Some("zip") => FileType::Zip,
        Some("log" | "txt" | "bugreport") => FileType::Text,
        _ => FileType::Unknown,
    }
}

fn get_suffix(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|s| s.to_lowercase())
}

fn is_log_name(name: &str) -> bool {
    get_file_type(Path::new(name)) == FileType::Text
}

// Every log file a path stands for: the path itself, or the `*.txt`, `*.log`
// and `*.zip` files directly inside a directory (except a previous summary).
pub fn collect_log_files(path: &Path) -> Result<Vec<PathBuf>> {
    match get_file_type(path) {
        FileType::Directory => {
            let mut files = Vec::new();
            for ext in ["txt", "log", "zip"] {
                let pattern = path.join(format!("*.{ext}"));
                for entry in glob(&pattern.to_string_lossy())? {
                    match entry {
                        Ok(file) if file.file_name() != Some(OsStr::new(SUMMARY_FILE)) => {
                            files.push(file)
                        }
                        Ok(_) => {}
                        Err(e) => warn!("unreadable directory entry: {}", e),
                    }
                }
            }
            files.sort();
            Ok(files)
        }
        FileType::Zip | FileType::Text => Ok(vec![path.to_path_buf()]),
        FileType::Unknown if path.is_file() => Ok(vec![path.to_path_buf()]),
        FileType::Unknown => Err(BugreportError::Unsupported(path.to_path_buf())),
    }
}

// Read a log into numbered lines. Zip archives yield their first log entry.
pub fn read_log_lines(path: &Path) -> Result<Vec<Line>> {
    match get_file_type(path) {
        FileType::Zip => read_zip_lines(path),
        FileType::Directory => Err(BugreportError::Unsupported(path.to_path_buf())),
        FileType::Text | FileType::Unknown => read_text_lines(path),
    }
}

fn read_text_lines(path: &Path) -> Result<Vec<Line>> {
    let bytes = fs::read(path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "read log file");
    Ok(Line::from_bytes(&bytes))
}

fn read_zip_lines(path: &Path) -> Result<Vec<Line>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !is_log_name(entry.name()) {
            continue;
        }
        debug!(archive = %path.display(), entry = entry.name(), "reading zipped log");
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        return Ok(Line::from_bytes(&bytes));
    }
    Err(BugreportError::NoLogFile(path.to_path_buf()))
}

// Where the batch summary of `path` goes: inside it for a directory, next
// to it for a file.
pub fn summary_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(SUMMARY_FILE)
    } else {
        path.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SUMMARY_FILE)
    }
}

pub fn write_summary(summary: &AnrSummary, out: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(out)?);
    summary.write_to(&mut writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bugreport_anr_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_get_file_type() {
        assert_eq!(get_file_type(Path::new("a/monkey.TXT")), FileType::Text);
        assert_eq!(get_file_type(Path::new("a/monkey.log")), FileType::Text);
        assert_eq!(get_file_type(Path::new("a/logs.zip")), FileType::Zip);
        assert_eq!(get_file_type(Path::new("a/logs.rar")), FileType::Unknown);
        assert_eq!(get_file_type(&std::env::temp_dir()), FileType::Directory);
    }

    #[test]
    fn test_read_text_lines() {
        let dir = scratch_dir("text");
        let path = dir.join("monkey.txt");
        fs::write(&path, b"one\ntwo\r\n\xffthree").unwrap();
        let lines = read_log_lines(&path).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], Line::new(2, "two"));
        assert_eq!(lines[2].text, "\u{fffd}three");

        let empty = dir.join("empty.txt");
        fs::write(&empty, "").unwrap();
        assert!(read_log_lines(&empty).unwrap().is_empty());

        assert!(matches!(
            read_log_lines(&dir.join("missing.txt")),
            Err(BugreportError::Io(_))
        ));
    }

    #[test]
    fn test_read_zip_lines() {
        let dir = scratch_dir("zip");
        let path = dir.join("logs.zip");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer.start_file("readme.md", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"# not a log").unwrap();
        writer.start_file("monkey.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"// NOT RESPONDING: a (pid 1)\nANR in a (a/.A)").unwrap();
        writer.finish().unwrap();

        let lines = read_log_lines(&path).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "ANR in a (a/.A)");

        let empty = dir.join("empty.zip");
        ZipWriter::new(File::create(&empty).unwrap()).finish().unwrap();
        assert!(matches!(
            read_log_lines(&empty),
            Err(BugreportError::NoLogFile(_))
        ));
    }

    #[test]
    fn test_collect_log_files_skips_summary() {
        let dir = scratch_dir("collect");
        for name in ["b.txt", "a.log", SUMMARY_FILE, "notes.md"] {
            fs::write(dir.join(name), "x").unwrap();
        }
        let files = collect_log_files(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.log", "b.txt"]);
        assert_eq!(summary_path(&dir), dir.join(SUMMARY_FILE));
        assert_eq!(summary_path(&dir.join("b.txt")), dir.join(SUMMARY_FILE));
    }
}
