use serde::{Deserialize, Serialize};

///
/// Page
///
/// Offset/limit pagination applied after filtering and sorting.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Page {
    pub offset: u32,
    pub limit: Option<u32>,
}

impl Page {
    #[must_use]
    pub const fn new(offset: u32, limit: Option<u32>) -> Self {
        Self { offset, limit }
    }
}

/// Apply offset/limit pagination to an in-memory vector, in-place.
pub(crate) fn apply_pagination<T>(rows: &mut Vec<T>, page: Page) {
    let total = rows.len();
    let start = usize::min(page.offset as usize, total);
    let end = page
        .limit
        .map_or(total, |l| usize::min(start + l as usize, total));

    if start >= end {
        rows.clear();
    } else {
        rows.drain(..start);
        rows.truncate(end - start);
    }
}

///
/// TESTS
///
