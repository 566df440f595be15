//! Migration directories.
//!
//! A [`Dir`] is an ordered set of migration files plus a distinguished
//! integrity manifest. Files are ordered lexically by name; the name
//! prefix up to the first underscore is the version, the remainder the
//! description. Two implementations ship: filesystem-backed
//! [`LocalDir`] and in-memory [`MemDir`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};
use crate::stmt::{parse_directives, Directives};

/// Reserved name of the integrity manifest.
pub const SUM_FILENAME: &str = "strata.sum";

/// File extension of migration files.
const MIGRATION_SUFFIX: &str = ".sql";

/// A single migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// File name, e.g. `20240101120000_add_users.sql`.
    pub name: String,
    /// Raw file content.
    pub bytes: Vec<u8>,
}

impl MigrationFile {
    /// Creates a migration file.
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// The version: the name prefix up to the first underscore, or the
    /// stem when there is none. Lexical order of versions is the
    /// application order.
    #[must_use]
    pub fn version(&self) -> &str {
        let stem = self.name.strip_suffix(MIGRATION_SUFFIX).unwrap_or(&self.name);
        stem.split_once('_').map_or(stem, |(v, _)| v)
    }

    /// The description: everything after the first underscore, minus
    /// the extension.
    #[must_use]
    pub fn desc(&self) -> &str {
        let stem = self.name.strip_suffix(MIGRATION_SUFFIX).unwrap_or(&self.name);
        stem.split_once('_').map_or("", |(_, d)| d)
    }

    /// The file content as UTF-8.
    pub fn content(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes).map_err(|e| {
            MigrateError::Driver(format!("migration file {} is not valid UTF-8: {e}", self.name))
        })
    }

    /// The directives of the file header.
    pub fn directives(&self) -> Result<Directives> {
        parse_directives(self.content()?)
    }

    /// Reports whether the file carries a checkpoint directive.
    pub fn is_checkpoint(&self) -> Result<bool> {
        Ok(self.directives()?.checkpoint.is_some())
    }
}

/// An ordered migration file set.
pub trait Dir: Send + Sync {
    /// All migration files in lexical order, excluding the manifest.
    fn files(&self) -> Result<Vec<MigrationFile>>;

    /// Reads a file by name, including the manifest.
    fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Writes a file.
    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Computes the checksum over the current files.
    fn checksum(&self) -> Result<Checksum> {
        Ok(Checksum::compute(&self.files()?))
    }
}

/// A filesystem-backed migration directory.
#[derive(Debug, Clone)]
pub struct LocalDir {
    path: PathBuf,
}

impl LocalDir {
    /// Opens the directory, which must exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("migration directory {} not found", path.display()),
            )));
        }
        Ok(Self { path })
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Dir for LocalDir {
    fn files(&self) -> Result<Vec<MigrationFile>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(MIGRATION_SUFFIX) || name == SUM_FILENAME {
                continue;
            }
            let bytes = std::fs::read(entry.path())?;
            files.push(MigrationFile::new(name, bytes));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path.join(name))?)
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        Ok(std::fs::write(self.path.join(name), bytes)?)
    }
}

/// An in-memory migration directory.
#[derive(Debug, Default)]
pub struct MemDir {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemDir {
    /// Creates an empty in-memory directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dir for MemDir {
    fn files(&self) -> Result<Vec<MigrationFile>> {
        let files = self.files.lock().expect("dir lock poisoned");
        Ok(files
            .iter()
            .filter(|(name, _)| name.ends_with(MIGRATION_SUFFIX) && name.as_str() != SUM_FILENAME)
            .map(|(name, bytes)| MigrationFile::new(name.clone(), bytes.clone()))
            .collect())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().expect("dir lock poisoned");
        files.get(name).cloned().ok_or_else(|| {
            MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file {name} not found"),
            ))
        })
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut files = self.files.lock().expect("dir lock poisoned");
        files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// The integrity manifest: a global hash plus one `h1:` line per file.
/// Any byte change to any file invalidates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    /// The global hash over all per-file lines.
    pub total: String,
    /// Per-file `(name, hash)` pairs in directory order.
    pub files: Vec<(String, String)>,
}

impl Checksum {
    /// Computes the checksum of the given files.
    #[must_use]
    pub fn compute(files: &[MigrationFile]) -> Self {
        let file_hashes: Vec<(String, String)> = files
            .iter()
            .map(|f| (f.name.clone(), hash_bytes(&f.bytes)))
            .collect();
        let mut hasher = Sha256::new();
        for (name, hash) in &file_hashes {
            hasher.update(name.as_bytes());
            hasher.update(b" h1:");
            hasher.update(hash.as_bytes());
            hasher.update(b"\n");
        }
        Self {
            total: BASE64.encode(hasher.finalize()),
            files: file_hashes,
        }
    }

    /// Renders the manifest file content.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("h1:{}\n", self.total);
        for (name, hash) in &self.files {
            out.push_str(&format!("{name} h1:{hash}\n"));
        }
        out
    }

    /// Parses manifest file content.
    pub fn parse(input: &str) -> Result<Self> {
        let mut lines = input.lines();
        let total = lines
            .next()
            .and_then(|l| l.strip_prefix("h1:"))
            .ok_or(MigrateError::ChecksumMismatch)?
            .to_string();
        let mut files = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, hash) = line
                .rsplit_once(" h1:")
                .ok_or(MigrateError::ChecksumMismatch)?;
            files.push((name.to_string(), hash.to_string()));
        }
        Ok(Self { total, files })
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    BASE64.encode(Sha256::digest(bytes))
}

/// Writes the manifest of the given checksum into the directory.
pub fn write_sum_file(dir: &dyn Dir, sum: &Checksum) -> Result<()> {
    dir.write_file(SUM_FILENAME, sum.render().as_bytes())
}

/// Validates the directory against its manifest. A missing, malformed
/// or stale manifest is a [`MigrateError::ChecksumMismatch`].
pub fn validate(dir: &dyn Dir) -> Result<()> {
    let stored = dir
        .read_file(SUM_FILENAME)
        .map_err(|_| MigrateError::ChecksumMismatch)?;
    let stored = String::from_utf8(stored).map_err(|_| MigrateError::ChecksumMismatch)?;
    let stored = Checksum::parse(&stored)?;
    if stored != dir.checksum()? {
        return Err(MigrateError::ChecksumMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_and_desc() {
        let f = MigrationFile::new("1.a_sub.up.sql", b"".to_vec());
        assert_eq!(f.version(), "1.a");
        assert_eq!(f.desc(), "sub.up");

        let f = MigrationFile::new("2.5.sql", b"".to_vec());
        assert_eq!(f.version(), "2.5");
        assert_eq!(f.desc(), "");

        let f = MigrationFile::new("20240101120000_add_users.sql", b"".to_vec());
        assert_eq!(f.version(), "20240101120000");
        assert_eq!(f.desc(), "add_users");
    }

    #[test]
    fn files_are_ordered_and_exclude_manifest() {
        let dir = MemDir::new();
        dir.write_file("2.sql", b"b").unwrap();
        dir.write_file("1.sql", b"a").unwrap();
        dir.write_file(SUM_FILENAME, b"h1:x\n").unwrap();
        dir.write_file("notes.txt", b"n").unwrap();

        let files = dir.files().unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["1.sql", "2.sql"]);
    }

    #[test]
    fn checksum_round_trip() {
        let dir = MemDir::new();
        dir.write_file("1.sql", b"CREATE TABLE t(c int);").unwrap();
        dir.write_file("2.sql", b"DROP TABLE t;").unwrap();

        let sum = dir.checksum().unwrap();
        let parsed = Checksum::parse(&sum.render()).unwrap();
        assert_eq!(parsed, sum);

        write_sum_file(&dir, &sum).unwrap();
        validate(&dir).unwrap();
    }

    #[test]
    fn any_byte_change_invalidates() {
        let dir = MemDir::new();
        dir.write_file("1.sql", b"CREATE TABLE t(c int);").unwrap();
        dir.write_file("2.sql", b"DROP TABLE t;").unwrap();
        write_sum_file(&dir, &dir.checksum().unwrap()).unwrap();
        validate(&dir).unwrap();

        dir.write_file("2.sql", b"DROP TABLE u;").unwrap();
        assert!(matches!(validate(&dir), Err(MigrateError::ChecksumMismatch)));
    }

    #[test]
    fn added_file_invalidates() {
        let dir = MemDir::new();
        dir.write_file("1.sql", b"SELECT 1;").unwrap();
        write_sum_file(&dir, &dir.checksum().unwrap()).unwrap();

        dir.write_file("2.sql", b"SELECT 2;").unwrap();
        assert!(matches!(validate(&dir), Err(MigrateError::ChecksumMismatch)));
    }

    #[test]
    fn missing_manifest_is_a_mismatch() {
        let dir = MemDir::new();
        dir.write_file("1.sql", b"SELECT 1;").unwrap();
        assert!(matches!(validate(&dir), Err(MigrateError::ChecksumMismatch)));
    }

    #[test]
    fn local_dir_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = LocalDir::new(tmp.path()).unwrap();
        dir.write_file("1_init.sql", b"CREATE TABLE t(c int);").unwrap();
        write_sum_file(&dir, &dir.checksum().unwrap()).unwrap();

        let files = dir.files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].version(), "1");
        validate(&dir).unwrap();
    }

    #[test]
    fn checkpoint_detection() {
        let f = MigrationFile::new("2_checkpoint.sql", b"-- strata:checkpoint v1\nSELECT 1;".to_vec());
        assert!(f.is_checkpoint().unwrap());

        let f = MigrationFile::new("1.sql", b"SELECT 1;".to_vec());
        assert!(!f.is_checkpoint().unwrap());
    }
}
