//! Reading team ids for the `--ids-from` option
//!
//! Ids are read one per line from a file or from stdin (`-`). Blank lines
//! and lines starting with `#` are skipped, so id lists can carry comments.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Comment marker for ignoring lines in id lists
const COMMENT_MARKER: &str = "#";

/// Team ids read from a list
#[derive(Debug, Clone)]
pub(crate) struct IdsFrom {
    pub(crate) ids: Vec<String>,
}

impl IdsFrom {
    /// Read ids from any reader
    pub(crate) fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut ids = Vec::new();
        for line in BufReader::new(reader).lines() {
            let line = line.context("Cannot read lines from reader")?;
            let id = line.trim();
            if !id.is_empty() && !id.starts_with(COMMENT_MARKER) {
                ids.push(id.to_string());
            }
        }
        Ok(IdsFrom { ids })
    }
}

impl TryFrom<&Path> for IdsFrom {
    type Error = anyhow::Error;

    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        if path == Path::new("-") {
            Self::from_reader(std::io::stdin())
        } else {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Cannot open --ids-from file: {}", path.display()))?;
            Self::from_reader(file)
        }
    }
}
