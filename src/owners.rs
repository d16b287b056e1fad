use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Organization → default owner mapping, read once from the admin users file.
#[derive(Debug, Clone)]
pub struct OwnerDirectory {
    owners: HashMap<i64, i64>,
    fallback_owner: i64,
    skipped_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerResolution {
    Mapped(i64),
    Fallback(i64),
}

impl OwnerResolution {
    pub fn owner_id(self) -> i64 {
        match self {
            OwnerResolution::Mapped(id) | OwnerResolution::Fallback(id) => id,
        }
    }

    pub fn is_fallback(self) -> bool {
        matches!(self, OwnerResolution::Fallback(_))
    }
}

impl OwnerDirectory {
    pub fn load(path: &Path, fallback_owner: i64) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::OwnerSource {
            path: PathBuf::from(path),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let dir = Self::parse(&text, fallback_owner);
        tracing::info!(
            path = %path.display(),
            organizations = dir.len(),
            skipped = dir.skipped_rows,
            "loaded owner directory"
        );
        Ok(dir)
    }

    /// Header line is ignored. Each remaining line is `owner_id,organization_id`.
    pub fn parse(text: &str, fallback_owner: i64) -> Self {
        let mut owners = HashMap::new();
        let mut skipped_rows = 0usize;

        for (line_no, raw) in text.lines().enumerate().skip(1) {
            if raw.trim().is_empty() {
                continue;
            }
            match parse_owner_line(raw) {
                Some((owner_id, org_id)) => {
                    owners.insert(org_id, owner_id);
                }
                None => {
                    skipped_rows += 1;
                    tracing::debug!(line = line_no + 1, "skipping malformed owner row");
                }
            }
        }

        Self {
            owners,
            fallback_owner,
            skipped_rows,
        }
    }

    pub fn from_pairs<I>(pairs: I, fallback_owner: i64) -> Self
    where
        I: IntoIterator<Item = (i64, i64)>,
    {
        Self {
            owners: pairs.into_iter().collect(),
            fallback_owner,
            skipped_rows: 0,
        }
    }

    pub fn resolve(&self, organization_id: i64) -> OwnerResolution {
        match self.owners.get(&organization_id) {
            Some(owner) => OwnerResolution::Mapped(*owner),
            None => OwnerResolution::Fallback(self.fallback_owner),
        }
    }

    pub fn fallback_owner(&self) -> i64 {
        self.fallback_owner
    }

    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

fn parse_owner_line(line: &str) -> Option<(i64, i64)> {
    let parts: Vec<String> = line.split(',').map(strip_quotes).collect();
    if parts.len() < 2 {
        return None;
    }
    let owner_id = parts[0].parse::<i64>().ok()?;
    let org_id = parts[1].parse::<i64>().ok()?;
    Some((owner_id, org_id))
}

fn strip_quotes(s: &str) -> String {
    let mut out = s.trim();
    if out.starts_with('"') && out.ends_with('"') && out.len() >= 2 {
        out = &out[1..out.len() - 1];
    }
    out.trim().to_string()
}
