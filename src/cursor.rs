use rusqlite::Connection;

use crate::model::LegacyEnvironment;
use crate::store;

pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Keyset cursor over unmigrated source rows.
///
/// Pages are ordered by id and never overlap: the next page starts after the
/// last id of the previous committed page, whether or not that page has been
/// linked yet.
#[derive(Debug, Clone)]
pub struct BatchCursor {
    page_size: usize,
    last_seen: i64,
    pages: u64,
}

impl BatchCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            last_seen: i64::MIN,
            pages: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn last_seen(&self) -> Option<i64> {
        (self.pages > 0).then_some(self.last_seen)
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Reads the next page without moving the cursor.
    pub fn next_page(&self, conn: &Connection) -> rusqlite::Result<Vec<LegacyEnvironment>> {
        store::fetch_unmigrated(conn, self.last_seen, self.page_size)
    }

    /// Moves past a page ending at `last_id`. Call only once the page's
    /// transaction has committed.
    pub fn advance(&mut self, last_id: i64) {
        self.last_seen = self.last_seen.max(last_id);
        self.pages += 1;
    }
}

impl Default for BatchCursor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}
