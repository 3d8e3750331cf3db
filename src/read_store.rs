// ferrous-erate/src/read_store.rs
//
// Read store interface. Refinement only needs the number of reads and each
// read's sequence length; a length of zero marks a deleted or absent read.

use anyhow::{Context, Result, bail, ensure};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read metadata needed by refinement. Read ids run from 1 to `read_count()`.
pub trait ReadStore: Sync {
    fn read_count(&self) -> u32;

    /// Sequence length of `read_id`; 0 for deleted reads and unknown ids.
    fn sequence_length(&self, read_id: u32) -> u32;
}

/// In-memory read lengths, indexed by read id (slot 0 unused).
#[derive(Debug, Clone, Default)]
pub struct ReadLengths {
    lengths: Vec<u32>,
}

impl ReadLengths {
    /// Build from lengths of reads `1..=lengths.len()`.
    pub fn from_lengths(lengths: &[u32]) -> Self {
        let mut all = Vec::with_capacity(lengths.len() + 1);
        all.push(0);
        all.extend_from_slice(lengths);
        ReadLengths { lengths: all }
    }

    /// Load a text table of `read_id<TAB>length` lines.
    ///
    /// Ids may appear in any order; ids that never appear have length 0.
    /// Blank lines and lines starting with `#` are ignored.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open read lengths '{}'", path.display()))?;
        let reader = BufReader::new(file);

        let mut lengths: Vec<u32> = vec![0];
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (id, len) = match (fields.next(), fields.next()) {
                (Some(id), Some(len)) => (id, len),
                _ => bail!(
                    "{}:{}: expected 'read_id length', got '{}'",
                    path.display(),
                    line_no + 1,
                    line
                ),
            };
            let id: u32 = id
                .parse()
                .with_context(|| format!("{}:{}: bad read id '{}'", path.display(), line_no + 1, id))?;
            let len: u32 = len
                .parse()
                .with_context(|| format!("{}:{}: bad length '{}'", path.display(), line_no + 1, len))?;
            ensure!(id > 0, "{}:{}: read ids start at 1", path.display(), line_no + 1);

            if lengths.len() <= id as usize {
                lengths.resize(id as usize + 1, 0);
            }
            lengths[id as usize] = len;
        }

        log::debug!(
            "Loaded {} read lengths from '{}'",
            lengths.len() - 1,
            path.display()
        );
        Ok(ReadLengths { lengths })
    }
}

impl ReadStore for ReadLengths {
    fn read_count(&self) -> u32 {
        (self.lengths.len() - 1) as u32
    }

    fn sequence_length(&self, read_id: u32) -> u32 {
        self.lengths.get(read_id as usize).copied().unwrap_or(0)
    }
}
