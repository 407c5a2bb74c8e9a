//! Durable offline queue — modifications that survived a dead network.
//!
//! An append-only JSONL journal per level plus a cursor file holding the
//! processed-through index. The cursor only advances after confirmed
//! server acceptance, so there is never ambiguity about which entries are
//! "assumed accepted": everything before the cursor, nothing after it.
//! Once every entry is processed both files are compacted away.

use crate::types::Modification;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub struct OfflineQueue {
    journal_path: PathBuf,
    cursor_path: PathBuf,
    entries: Vec<Modification>,
    processed: usize,
}

fn sanitize(level: &str) -> String {
    level
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl OfflineQueue {
    /// Open (or create) the queue for one level, replaying the journal.
    pub fn open(dir: &Path, level: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let stem = sanitize(level);
        let journal_path = dir.join(format!("{}.journal", stem));
        let cursor_path = dir.join(format!("{}.cursor", stem));

        let mut entries = Vec::new();
        if journal_path.exists() {
            let reader = BufReader::new(File::open(&journal_path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Modification>(&line) {
                    Ok(m) => entries.push(m),
                    Err(e) => {
                        // A torn tail write must not poison the queue.
                        log::warn!(
                            "skipping corrupt journal line {} in {}: {}",
                            lineno + 1,
                            journal_path.display(),
                            e
                        );
                    }
                }
            }
        }

        let processed = if cursor_path.exists() {
            fs::read_to_string(&cursor_path)?
                .trim()
                .parse()
                .unwrap_or(0)
        } else {
            0
        };

        let processed = processed.min(entries.len());
        Ok(Self {
            journal_path,
            cursor_path,
            entries,
            processed,
        })
    }

    /// Entries not yet confirmed by the server.
    pub fn pending(&self) -> &[Modification] {
        &self.entries[self.processed..]
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    /// Append unsent modifications to the journal.
    pub fn append(&mut self, mods: &[Modification]) -> std::io::Result<()> {
        if mods.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)?;
        for m in mods {
            let line = serde_json::to_string(m)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writeln!(file, "{}", line)?;
        }
        file.sync_all()?;
        self.entries.extend_from_slice(mods);
        Ok(())
    }

    /// Advance the cursor past `count` confirmed entries.
    pub fn advance(&mut self, count: usize) -> std::io::Result<()> {
        self.processed = (self.processed + count).min(self.entries.len());
        if self.processed == self.entries.len() {
            return self.compact();
        }
        fs::write(&self.cursor_path, self.processed.to_string())
    }

    /// Mark everything confirmed.
    pub fn clear(&mut self) -> std::io::Result<()> {
        self.processed = self.entries.len();
        self.compact()
    }

    fn compact(&mut self) -> std::io::Result<()> {
        self.entries.clear();
        self.processed = 0;
        if self.journal_path.exists() {
            fs::remove_file(&self.journal_path)?;
        }
        if self.cursor_path.exists() {
            fs::remove_file(&self.cursor_path)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
