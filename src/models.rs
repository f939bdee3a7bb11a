use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Where a book sits on the reading shelf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadingStatus {
    #[default]
    ToRead,
    Reading,
    Read,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::ToRead => "to-read",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Read => "read",
        }
    }

    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim() {
            "to-read" => Some(ReadingStatus::ToRead),
            "reading" => Some(ReadingStatus::Reading),
            "read" => Some(ReadingStatus::Read),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Unknown or non-string labels land in the to-read bucket instead of failing
// the whole collection decode.
impl<'de> Deserialize<'de> for ReadingStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        let status = raw
            .as_ref()
            .and_then(|value| value.as_str())
            .and_then(ReadingStatus::from_label);
        if status.is_none() {
            log::warn!("unrecognized reading status {:?}, treating as to-read", raw);
        }
        Ok(status.unwrap_or_default())
    }
}

/// A single book in the library, as persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    pub id: String, // UUID
    pub title: String,
    pub author: String,
    pub total_pages: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_page: u32,
    #[serde(default)]
    pub status: ReadingStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rating: u8, // 0 = unrated, 1-5 stars
    #[serde(default, deserialize_with = "null_as_default")]
    pub notes: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cover_image_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub isbn: String,
    pub added_date: DateTime<Utc>,
}

impl BookRecord {
    /// Builds a fresh record with every optional field at its default.
    pub(crate) fn from_new(input: NewBook, id: String, added_date: DateTime<Utc>) -> Self {
        BookRecord {
            id,
            title: input.title,
            author: input.author,
            total_pages: input.total_pages,
            current_page: 0,
            status: ReadingStatus::ToRead,
            rating: 0,
            notes: String::new(),
            cover_image_url: input.cover_image_url.unwrap_or_default(),
            isbn: input.isbn.unwrap_or_default(),
            added_date,
        }
    }

    pub fn is_rated(&self) -> bool {
        self.rating > 0
    }

    /// Whole-percent reading progress, capped at 100.
    pub fn progress_percent(&self) -> u32 {
        if self.total_pages == 0 {
            return 0;
        }
        let percent = u64::from(self.current_page) * 100 / u64::from(self.total_pages);
        percent.min(100) as u32
    }
}

/// Caller-supplied fields for a new book. Validation is the caller's job.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub total_pages: u32,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
}

impl NewBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>, total_pages: u32) -> Self {
        NewBook {
            title: title.into(),
            author: author.into(),
            total_pages,
            cover_image_url: None,
            isbn: None,
        }
    }

    pub fn with_cover(mut self, url: impl Into<String>) -> Self {
        self.cover_image_url = Some(url.into());
        self
    }

    pub fn with_isbn(mut self, isbn: impl Into<String>) -> Self {
        self.isbn = Some(isbn.into());
        self
    }
}

/// Partial update. `None` leaves the stored value untouched.
///
/// There is deliberately no `id` or `added_date` here: JSON patches carrying
/// those keys decode fine and the keys are dropped.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BookPatch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub total_pages: Option<u32>,
    pub current_page: Option<u32>,
    pub status: Option<ReadingStatus>,
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub cover_image_url: Option<String>,
    pub isbn: Option<String>,
}

impl BookPatch {
    pub fn is_empty(&self) -> bool {
        *self == BookPatch::default()
    }

    /// Shallow merge onto an existing record.
    pub fn apply_to(self, record: &mut BookRecord) {
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(author) = self.author {
            record.author = author;
        }
        if let Some(total_pages) = self.total_pages {
            record.total_pages = total_pages;
        }
        if let Some(current_page) = self.current_page {
            record.current_page = current_page;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(rating) = self.rating {
            record.rating = rating;
        }
        if let Some(notes) = self.notes {
            record.notes = notes;
        }
        if let Some(cover_image_url) = self.cover_image_url {
            record.cover_image_url = cover_image_url;
        }
        if let Some(isbn) = self.isbn {
            record.isbn = isbn;
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
