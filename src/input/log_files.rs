//! Log file discovery and reading
//!
//! Log files are read whole; invalid UTF-8 is replaced rather than rejected
//! so a single corrupt byte never hides the rest of a file.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// List files in `dir` with the given extension, sorted by path
pub fn find_log_files(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Read every line of a file, replacing invalid UTF-8 sequences
pub fn read_lines_lossy(path: &Path) -> io::Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let bytes_read = reader.read_until(b'\n', &mut buf)?;
        if bytes_read == 0 {
            break; // EOF
        }
        let line = String::from_utf8_lossy(&buf);
        lines.push(line.trim_end_matches(['\n', '\r']).to_string());
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_find_log_files_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.log"), "x").unwrap();
        std::fs::write(dir.path().join("a.LOG"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested.log")).unwrap();

        let files = find_log_files(dir.path(), "log").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.LOG", "b.log"]);
    }

    #[test]
    fn test_find_log_files_missing_dir() {
        assert!(find_log_files(Path::new("/nonexistent/dir"), "log").is_err());
    }

    #[test]
    fn test_read_lines_lossy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"first\r\nsec\xffond\nlast").unwrap();

        let lines = read_lines_lossy(file.path()).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "first");
        assert!(lines[1].starts_with("sec"));
        assert!(lines[1].contains('\u{FFFD}'));
        assert_eq!(lines[2], "last");
    }
}
