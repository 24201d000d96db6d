//! Cursor-based scan pages

/// Default number of entries requested per scan page
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 32;

/// One page of a key scan. `next_cursor == 0` ends the iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    pub next_cursor: u64,
}

/// One page of a map field scan. `next_cursor == 0` ends the iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapPage {
    pub fields: Vec<(String, String)>,
    pub next_cursor: u64,
}

impl KeyPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor == 0
    }
}

impl MapPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor == 0
    }
}

/// Cursor for offset-paginated stores: advance by the rows returned, or end
/// the scan once a short page comes back.
pub fn next_offset_cursor(cursor: u64, returned: usize, page_size: usize) -> u64 {
    if returned < page_size {
        0
    } else {
        cursor + returned as u64
    }
}
