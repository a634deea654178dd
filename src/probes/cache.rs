//! Process-global, load-once-per-path file caches backing the probes:
//! FTP payloads, credential lists, the expected web page and SQL statements.
//! Each loader runs exactly once per path for the process lifetime; later
//! calls get the cached result, success or failure.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("failed to load {}: {reason}", .path.display())]
pub struct CacheError {
    pub path: PathBuf,
    pub reason: String,
}

type CacheCell<T> = OnceLock<Mutex<HashMap<PathBuf, Result<Arc<T>, String>>>>;

static PAYLOADS: CacheCell<HashMap<String, Vec<u8>>> = OnceLock::new();
static CREDENTIALS: CacheCell<Vec<(String, String)>> = OnceLock::new();
static PAGES: CacheCell<String> = OnceLock::new();
static STATEMENTS: CacheCell<Vec<String>> = OnceLock::new();

fn cached<T, F>(cell: &CacheCell<T>, path: &Path, load: F) -> Result<Arc<T>, CacheError>
where
    F: FnOnce(&Path) -> Result<T, String>,
{
    let map = cell.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = map.lock().unwrap();
    map.entry(path.to_path_buf())
        .or_insert_with(|| load(path).map(Arc::new))
        .clone()
        .map_err(|reason| CacheError {
            path: path.to_path_buf(),
            reason,
        })
}

/// Payload files for the FTP round-trip probes, keyed by base name.
/// `path` may be a regular file or a directory scanned one level deep.
pub fn payloads(path: &Path) -> Result<Arc<HashMap<String, Vec<u8>>>, CacheError> {
    cached(&PAYLOADS, path, |path| {
        let meta = fs::metadata(path).map_err(|e| e.to_string())?;
        let mut files = HashMap::new();

        if meta.is_dir() {
            for entry in fs::read_dir(path).map_err(|e| e.to_string())? {
                let entry = entry.map_err(|e| e.to_string())?;
                if !entry.file_type().map_err(|e| e.to_string())?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let data = fs::read(entry.path()).map_err(|e| e.to_string())?;
                files.insert(name, data);
            }
        } else {
            let name = path
                .file_name()
                .ok_or_else(|| "path has no file name".to_owned())?
                .to_string_lossy()
                .into_owned();
            let data = fs::read(path).map_err(|e| e.to_string())?;
            files.insert(name, data);
        }

        if files.is_empty() {
            return Err("no payload files found".to_owned());
        }
        Ok(files)
    })
}

/// Credential list, one `user:pass` per line. Blank lines are skipped;
/// a line without a colon fails the whole file.
pub fn credentials(path: &Path) -> Result<Arc<Vec<(String, String)>>, CacheError> {
    cached(&CREDENTIALS, path, |path| {
        let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
        let mut pairs = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (user, pass) = line
                .split_once(':')
                .ok_or_else(|| format!("credential line without colon: {line:?}"))?;
            pairs.push((user.to_owned(), pass.to_owned()));
        }
        if pairs.is_empty() {
            return Err("credentials file has no usable lines".to_owned());
        }
        Ok(pairs)
    })
}

/// Expected web page contents with newlines stripped.
pub fn expected_page(path: &Path) -> Result<Arc<String>, CacheError> {
    cached(&PAGES, path, |path| {
        fs::read_to_string(path)
            .map(|text| text.replace('\n', ""))
            .map_err(|e| e.to_string())
    })
}

/// SQL statements split out of a schema file.
pub fn sql_statements(path: &Path) -> Result<Arc<Vec<String>>, CacheError> {
    cached(&STATEMENTS, path, |path| {
        let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
        let statements: Vec<String> = text
            .split(';')
            .map(str::trim)
            .filter(|stmt| !stmt.is_empty())
            .map(str::to_owned)
            .collect();
        if statements.is_empty() {
            return Err("schema file has no statements".to_owned());
        }
        Ok(statements)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn payload_directory_is_scanned_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), [1u8, 2, 3]).unwrap();
        fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), b"deep").unwrap();

        let files = payloads(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["a.txt"], vec![1, 2, 3]);
        assert_eq!(files["b.txt"], b"hello");
    }

    #[test]
    fn single_payload_file_is_keyed_by_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd.bin");
        fs::write(&path, b"\x01\x02\x03").unwrap();

        let files = payloads(&path).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["motd.bin"], b"\x01\x02\x03");
    }

    #[test]
    fn payload_loader_caches_first_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("once.txt");
        fs::write(&path, b"first").unwrap();

        let first = payloads(&path).unwrap();
        fs::write(&path, b"second").unwrap();
        let second = payloads(&path).unwrap();
        assert_eq!(first["once.txt"], second["once.txt"]);
    }

    #[test]
    fn credentials_skip_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.txt");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "alice:wonderland").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "bob:builder").unwrap();

        let pairs = credentials(&path).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("alice".to_owned(), "wonderland".to_owned()));
    }

    #[test]
    fn credential_line_without_colon_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        fs::write(&path, "alice wonderland\n").unwrap();

        let err = credentials(&path).unwrap_err();
        assert!(err.reason.contains("colon"));
    }

    #[test]
    fn password_may_contain_colons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colons.txt");
        fs::write(&path, "svc:pa:ss:word\n").unwrap();

        let pairs = credentials(&path).unwrap();
        assert_eq!(pairs[0], ("svc".to_owned(), "pa:ss:word".to_owned()));
    }

    #[test]
    fn expected_page_strips_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        fs::write(&path, "<html>\n<body>Hello</body>\n</html>\n").unwrap();

        let page = expected_page(&path).unwrap();
        assert_eq!(&*page, "<html><body>Hello</body></html>");
    }

    #[test]
    fn sql_statements_split_on_semicolons() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.sql");
        fs::write(&path, "SELECT 1;\n\nSELECT 2;\n").unwrap();

        let statements = sql_statements(&path).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "SELECT 1");
    }
}
