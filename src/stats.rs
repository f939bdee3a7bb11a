//! Reading statistics, folded over the whole collection on demand.

use serde::{Deserialize, Serialize};

use crate::models::{BookRecord, ReadingStatus};
use crate::storage::KeyValueStore;
use crate::store::BookStore;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_books: usize,
    pub read_books: usize,
    pub reading_books: usize,
    pub to_read_books: usize,
    pub total_pages_read: u64,
    /// Mean of non-zero ratings, one decimal. `None` when nothing is rated.
    pub average_rating: Option<f64>,
}

impl Stats {
    /// Share of the library that has been finished, 0.0 for an empty library.
    pub fn completion_ratio(&self) -> f64 {
        if self.total_books == 0 {
            return 0.0;
        }
        self.read_books as f64 / self.total_books as f64
    }
}

#[derive(Default)]
struct Tally {
    stats: Stats,
    rating_sum: u64,
    rated: u64,
}

pub fn summarize(books: &[BookRecord]) -> Stats {
    let tally = books.iter().fold(Tally::default(), |mut tally, book| {
        tally.stats.total_books += 1;
        match book.status {
            ReadingStatus::Read => {
                tally.stats.read_books += 1;
                tally.stats.total_pages_read += u64::from(book.total_pages);
            }
            ReadingStatus::Reading => {
                tally.stats.reading_books += 1;
                tally.stats.total_pages_read += u64::from(book.current_page);
            }
            ReadingStatus::ToRead => tally.stats.to_read_books += 1,
        }
        if book.is_rated() {
            tally.rating_sum += u64::from(book.rating);
            tally.rated += 1;
        }
        tally
    });

    let mut stats = tally.stats;
    if tally.rated > 0 {
        let mean = tally.rating_sum as f64 / tally.rated as f64;
        stats.average_rating = Some((mean * 10.0).round() / 10.0);
    }
    stats
}

/// Statistics over whatever the store currently holds.
pub fn compute_statistics<S: KeyValueStore>(store: &BookStore<S>) -> Stats {
    summarize(&store.list_all())
}
