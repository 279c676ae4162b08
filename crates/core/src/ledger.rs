//! On-disk ledger: one JSON fact per line, pure append.
//!
//! The file is the source of truth; everything in memory (index, schema,
//! reading log) is a rebuildable view of it. Writes go through a scoped
//! exclusive advisory lock so a second process can never interleave with
//! an append; the lock fails fast rather than blocking.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::{Fact, QuerentError, Result};

/// Handle on the ledger file. Owns the path, not an open descriptor;
/// descriptors are opened per operation so the lock scope is explicit.
#[derive(Debug)]
pub(crate) struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read every fact in ledger order, creating the file if absent.
    ///
    /// A final line that fails to parse is treated as a benign partial
    /// write: dropped with a warning. A malformed *interior* line means
    /// recorded history would be silently skipped, so the load aborts.
    pub fn load(&self) -> Result<Vec<Fact>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)?;

        let reader = BufReader::new(&file);
        let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
        let last_content = lines.iter().rposition(|l| !l.trim().is_empty());

        let mut facts = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                // Blank interior lines would hide history; blank tail is noise.
                if Some(idx) < last_content {
                    return Err(QuerentError::CorruptRecord { line: idx + 1 });
                }
                continue;
            }
            match serde_json::from_str::<Fact>(line) {
                Ok(fact) => facts.push(fact),
                Err(err) => {
                    if Some(idx) == last_content {
                        warn!(
                            line = idx + 1,
                            path = %self.path.display(),
                            %err,
                            "dropping truncated final ledger line"
                        );
                        break;
                    }
                    return Err(QuerentError::CorruptRecord { line: idx + 1 });
                }
            }
        }

        debug!(facts = facts.len(), path = %self.path.display(), "ledger loaded");
        Ok(facts)
    }

    /// Acquire the exclusive write lock, failing fast with `StoreLocked`
    /// if another process holds it. The lock is released when the guard
    /// drops, on every exit path.
    pub fn lock(&self) -> Result<LedgerLock> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if let Err(err) = file.try_lock_exclusive() {
            let contended = fs2::lock_contended_error();
            if err.kind() == contended.kind() || err.raw_os_error() == contended.raw_os_error() {
                return Err(QuerentError::StoreLocked(self.path.clone()));
            }
            return Err(err.into());
        }
        Ok(LedgerLock { file })
    }

    /// Replace the whole ledger atomically (merge only): write a sibling
    /// temp file, fsync, rename over the original. The caller must hold
    /// the lock for the duration.
    pub fn rewrite(&self, _guard: &LedgerLock, facts: &[Fact]) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for fact in facts {
                serde_json::to_writer(&mut tmp, fact)?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Scoped exclusive lock over the ledger file, append-capable.
#[derive(Debug)]
pub(crate) struct LedgerLock {
    file: File,
}

impl LedgerLock {
    pub fn append(&mut self, fact: &Fact) -> Result<()> {
        let mut line = serde_json::to_string(fact)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        debug!(entity = %fact.entity, attribute = %fact.attribute, "fact appended");
        Ok(())
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Entity;
    use crate::{Source, Value};
    use chrono::Utc;
    use std::io::Write as _;

    fn fact(n: u32) -> Fact {
        Fact::new(
            Entity::card("the_fool"),
            "note",
            Value::Text(format!("note {n}")),
            Utc::now(),
            Source::User,
        )
    }

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("store.ndjson"));
        assert!(ledger.load().unwrap().is_empty());

        {
            let mut lock = ledger.lock().unwrap();
            lock.append(&fact(1)).unwrap();
            lock.append(&fact(2)).unwrap();
        }

        let facts = ledger.load().unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].value, Value::Text("note 1".into()));
        assert_eq!(facts[1].value, Value::Text("note 2".into()));
    }

    #[test]
    fn truncated_final_line_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.ndjson");
        let ledger = Ledger::new(&path);
        {
            let mut lock = ledger.lock().unwrap();
            lock.append(&fact(1)).unwrap();
        }
        // Simulate a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"entity\":\"card:death\",\"attr").unwrap();
        drop(file);

        let facts = ledger.load().unwrap();
        assert_eq!(facts.len(), 1, "intact prefix survives, tail is dropped");
    }

    #[test]
    fn corrupt_interior_line_aborts_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.ndjson");
        let ledger = Ledger::new(&path);
        {
            let mut lock = ledger.lock().unwrap();
            lock.append(&fact(1)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json at all\n").unwrap();
        drop(file);
        {
            let mut lock = ledger.lock().unwrap();
            lock.append(&fact(2)).unwrap();
        }

        let err = ledger.load().unwrap_err();
        assert!(matches!(err, QuerentError::CorruptRecord { line: 2 }));
    }

    #[test]
    fn rewrite_replaces_contents_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("store.ndjson"));
        {
            let mut lock = ledger.lock().unwrap();
            lock.append(&fact(1)).unwrap();
        }

        let replacement = vec![fact(10), fact(11), fact(12)];
        {
            let guard = ledger.lock().unwrap();
            ledger.rewrite(&guard, &replacement).unwrap();
        }
        let facts = ledger.load().unwrap();
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].value, Value::Text("note 10".into()));
    }
}
