//! Remote catalog lookup used to pre-fill new books.
//!
//! Nothing in the store depends on this module. Every network failure degrades
//! to an empty candidate list.

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

use crate::models::NewBook;

const HTTP_TIMEOUT_SECS: u64 = 6;
const HTTP_MAX_RETRIES: u64 = 1;
const HTTP_USER_AGENT: &str = concat!("bookshelf/", env!("CARGO_PKG_VERSION"));
const MAX_CANDIDATES_PER_SOURCE: usize = 5;
static METADATA_DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSelection {
    pub open_library: bool,
    pub google_books: bool,
}

impl Default for SourceSelection {
    fn default() -> Self {
        SourceSelection {
            open_library: true,
            google_books: true,
        }
    }
}

impl SourceSelection {
    pub fn with_fallback(mut self) -> Self {
        if !self.open_library && !self.google_books {
            self.open_library = true;
        }
        self
    }
}

/// One catalog hit. Fields map onto [`NewBook`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataCandidate {
    pub source: &'static str,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub page_count: Option<u32>,
    pub isbn: Option<String>,
    pub cover_url: Option<String>,
    pub confidence: f64,
}

impl MetadataCandidate {
    /// `None` unless the hit has a title, at least one author and a page count.
    pub fn into_new_book(self) -> Option<NewBook> {
        let title = self.title.and_then(non_empty)?;
        let authors: Vec<String> = self.authors.into_iter().filter_map(non_empty).collect();
        if authors.is_empty() {
            return None;
        }
        let total_pages = self.page_count.filter(|pages| *pages > 0)?;
        Some(NewBook {
            title,
            author: authors.join(", "),
            total_pages,
            cover_image_url: self.cover_url,
            isbn: self.isbn,
        })
    }
}

pub fn lookup_isbn(raw: &str) -> Vec<MetadataCandidate> {
    lookup_isbn_with(raw, SourceSelection::default())
}

pub fn lookup_isbn_with(raw: &str, sources: SourceSelection) -> Vec<MetadataCandidate> {
    let Some(isbn) = normalize_isbn(raw) else {
        log::warn!("isbn lookup skipped, not a valid isbn: {}", raw);
        return vec![];
    };
    let selection = sources.with_fallback();
    let mut candidates = vec![];

    if selection.open_library {
        let url = format!(
            "https://openlibrary.org/search.json?isbn={}&limit={}",
            isbn, MAX_CANDIDATES_PER_SOURCE
        );
        if let Some(data) = fetch_json_with_retry(&url) {
            candidates.extend(parse_openlibrary_docs(&data, 0.9).into_iter().map(|mut candidate| {
                candidate.isbn = Some(isbn.clone());
                candidate
            }));
        }
    }
    if selection.google_books {
        let url = format!("https://www.googleapis.com/books/v1/volumes?q=isbn:{}", isbn);
        if let Some(data) = fetch_json_with_retry(&url) {
            candidates.extend(parse_google_volumes(&data, 0.85));
        }
    }

    log::info!("isbn lookup {} returned {} candidates", isbn, candidates.len());
    rank_candidates(candidates)
}

/// Free-text search. "Title by Author" and "Title - Author" are split.
pub fn search(query: &str) -> Vec<MetadataCandidate> {
    search_with(query, SourceSelection::default())
}

pub fn search_with(query: &str, sources: SourceSelection) -> Vec<MetadataCandidate> {
    let (title, author) = parse_search_query(query.trim());
    if title.is_empty() {
        return vec![];
    }
    let selection = sources.with_fallback();
    let mut candidates = vec![];

    if selection.open_library {
        let mut url = format!(
            "https://openlibrary.org/search.json?title={}&limit={}",
            urlencoding::encode(&title),
            MAX_CANDIDATES_PER_SOURCE
        );
        if let Some(author) = author.as_deref() {
            url.push_str(&format!("&author={}", urlencoding::encode(author)));
        }
        if let Some(data) = fetch_json_with_retry(&url) {
            candidates.extend(parse_openlibrary_docs(&data, 0.7));
        }
    }
    if selection.google_books {
        let mut terms = format!("intitle:{}", title);
        if let Some(author) = author.as_deref() {
            terms.push_str(&format!(" inauthor:{}", author));
        }
        let url = format!(
            "https://www.googleapis.com/books/v1/volumes?q={}",
            urlencoding::encode(&terms)
        );
        if let Some(data) = fetch_json_with_retry(&url) {
            candidates.extend(parse_google_volumes(&data, 0.7));
        }
    }

    log::info!("search \"{}\" returned {} candidates", query, candidates.len());
    rank_candidates(candidates)
}

fn rank_candidates(mut candidates: Vec<MetadataCandidate>) -> Vec<MetadataCandidate> {
    candidates.retain(|candidate| candidate.title.is_some());
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates
}

fn parse_openlibrary_docs(data: &Value, base_confidence: f64) -> Vec<MetadataCandidate> {
    let docs = data
        .get("docs")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default();
    docs.iter()
        .take(MAX_CANDIDATES_PER_SOURCE)
        .enumerate()
        .map(|(index, doc)| MetadataCandidate {
            source: "openlibrary",
            title: json_string(doc, "title"),
            authors: json_strings(doc, "author_name"),
            page_count: doc
                .get("number_of_pages_median")
                .and_then(|value| value.as_u64())
                .and_then(|value| u32::try_from(value).ok()),
            isbn: doc
                .get("isbn")
                .and_then(|value| value.as_array())
                .and_then(|values| {
                    values
                        .iter()
                        .filter_map(|value| value.as_str())
                        .find_map(normalize_isbn)
                }),
            cover_url: doc
                .get("cover_i")
                .and_then(|value| value.as_i64())
                .map(|id| format!("https://covers.openlibrary.org/b/id/{}-M.jpg", id)),
            confidence: base_confidence - index as f64 * 0.05,
        })
        .collect()
}

fn parse_google_volumes(data: &Value, base_confidence: f64) -> Vec<MetadataCandidate> {
    let items = data
        .get("items")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default();
    items
        .iter()
        .take(MAX_CANDIDATES_PER_SOURCE)
        .enumerate()
        .map(|(index, item)| {
            let info = item.get("volumeInfo").cloned().unwrap_or(Value::Null);
            let identifiers = info
                .get("industryIdentifiers")
                .and_then(|value| value.as_array())
                .cloned()
                .unwrap_or_default();
            let identifier_of = |kind: &str| {
                identifiers.iter().find_map(|entry| {
                    if entry.get("type").and_then(|value| value.as_str()) == Some(kind) {
                        entry
                            .get("identifier")
                            .and_then(|value| value.as_str())
                            .and_then(normalize_isbn)
                    } else {
                        None
                    }
                })
            };
            let isbn = identifier_of("ISBN_13").or_else(|| identifier_of("ISBN_10"));
            let cover_url = info
                .get("imageLinks")
                .and_then(|value| value.get("thumbnail").or_else(|| value.get("smallThumbnail")))
                .and_then(|value| value.as_str())
                .map(|value| value.replace("http://", "https://"));

            MetadataCandidate {
                source: "google",
                title: json_string(&info, "title"),
                authors: json_strings(&info, "authors"),
                page_count: info
                    .get("pageCount")
                    .and_then(|value| value.as_u64())
                    .and_then(|value| u32::try_from(value).ok()),
                isbn,
                cover_url,
                confidence: if index == 0 {
                    base_confidence
                } else {
                    base_confidence - 0.15
                },
            }
        })
        .collect()
}

fn fetch_json_with_retry(url: &str) -> Option<Value> {
    let debug_enabled = metadata_debug_enabled();
    let client = match Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            log::warn!("metadata http client unavailable: {}", err);
            return None;
        }
    };

    if debug_enabled {
        log::info!("[metadata-debug] http start url={}", url);
    }

    for attempt in 0..=HTTP_MAX_RETRIES {
        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, HTTP_USER_AGENT)
            .send();

        let response = match response {
            Ok(value) => value,
            Err(err) => {
                if debug_enabled {
                    log::warn!(
                        "[metadata-debug] http transport_error url={} attempt={} error={}",
                        url,
                        attempt + 1,
                        err
                    );
                }
                if attempt < HTTP_MAX_RETRIES {
                    std::thread::sleep(Duration::from_millis(350 * (attempt + 1)));
                    continue;
                }
                log::warn!("metadata request failed for {}: {}", url, err);
                return None;
            }
        };

        let status = response.status();
        if status.is_success() {
            if debug_enabled {
                log::info!("[metadata-debug] http success url={} status={}", url, status);
            }
            return match response.json::<Value>() {
                Ok(value) => Some(value),
                Err(err) => {
                    log::warn!("metadata response parse failed for {}: {}", url, err);
                    None
                }
            };
        }

        if (status.as_u16() == 429 || status.is_server_error()) && attempt < HTTP_MAX_RETRIES {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(|value| value * 1000)
                .unwrap_or(350 * (attempt + 1));
            std::thread::sleep(Duration::from_millis(retry_after_ms.min(4_000)));
            continue;
        }

        log::warn!("metadata request returned {} for {}", status, url);
        return None;
    }

    None
}

fn metadata_debug_enabled() -> bool {
    *METADATA_DEBUG_ENABLED.get_or_init(|| {
        std::env::var("LIBRARY_METADATA_DEBUG")
            .map(|value| {
                let lowered = value.trim().to_ascii_lowercase();
                lowered == "1" || lowered == "true" || lowered == "yes" || lowered == "on"
            })
            .unwrap_or(false)
    })
}

/// Strips separators and validates the check digit. Returns the bare ISBN-10 or ISBN-13.
pub fn normalize_isbn(value: &str) -> Option<String> {
    let cleaned = value
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == 'X' || *ch == 'x')
        .map(|ch| ch.to_ascii_uppercase())
        .collect::<String>();
    if is_valid_isbn10(&cleaned) || is_valid_isbn13(&cleaned) {
        Some(cleaned)
    } else {
        None
    }
}

fn is_valid_isbn10(value: &str) -> bool {
    if value.len() != 10 {
        return false;
    }
    let mut sum = 0;
    for (index, ch) in value.chars().enumerate() {
        let digit = match (index, ch) {
            (9, 'X') => 10,
            (_, ch) => match ch.to_digit(10) {
                Some(digit) => digit,
                None => return false,
            },
        };
        sum += digit * (10 - index as u32);
    }
    sum % 11 == 0
}

fn is_valid_isbn13(value: &str) -> bool {
    if value.len() != 13 {
        return false;
    }
    let mut sum = 0;
    for (index, ch) in value.chars().enumerate() {
        let Some(digit) = ch.to_digit(10) else {
            return false;
        };
        sum += if index % 2 == 0 { digit } else { digit * 3 };
    }
    sum % 10 == 0
}

fn parse_search_query(query: &str) -> (String, Option<String>) {
    let lowered = query.to_ascii_lowercase();
    if let Some(result) = split_search_query(query, &lowered, " by ") {
        return result;
    }
    if let Some(result) = split_search_query(query, &lowered, " - ") {
        return result;
    }
    (query.to_string(), None)
}

fn split_search_query(
    original: &str,
    lowered: &str,
    needle: &str,
) -> Option<(String, Option<String>)> {
    let index = lowered.find(needle)?;
    let (title_part, author_part) = original.split_at(index);
    let author = author_part.get(needle.len()..).unwrap_or("").trim();
    let title = title_part.trim();
    if title.is_empty() {
        return None;
    }
    Some((title.to_string(), non_empty(author.to_string())))
}

fn json_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|value| value.as_str())
        .map(|value| value.to_string())
        .and_then(non_empty)
}

fn json_strings(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|value| value.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_str())
                .map(|value| value.to_string())
                .filter_map(non_empty)
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        lookup_isbn, normalize_isbn, parse_google_volumes, parse_openlibrary_docs,
        parse_search_query, rank_candidates, search, MetadataCandidate, SourceSelection,
    };
    use serde_json::json;

    #[test]
    fn normalizes_and_validates_isbns() {
        assert_eq!(normalize_isbn("0-306-40615-2").as_deref(), Some("0306406152"));
        assert_eq!(normalize_isbn("978-0-306-40615-7").as_deref(), Some("9780306406157"));
        assert_eq!(normalize_isbn("0-8044-2957-x").as_deref(), Some("080442957X"));
        assert_eq!(normalize_isbn("0306406153"), None);
        assert_eq!(normalize_isbn("9780306406158"), None);
        assert_eq!(normalize_isbn("12345"), None);
        assert_eq!(normalize_isbn(""), None);
    }

    #[test]
    fn splits_title_and_author_queries() {
        assert_eq!(
            parse_search_query("Dune by Frank Herbert"),
            ("Dune".to_string(), Some("Frank Herbert".to_string()))
        );
        assert_eq!(
            parse_search_query("Les Misérables - Victor Hugo"),
            ("Les Misérables".to_string(), Some("Victor Hugo".to_string()))
        );
        assert_eq!(parse_search_query("Dune"), ("Dune".to_string(), None));
        assert_eq!(
            parse_search_query(" by Nobody"),
            (" by Nobody".to_string(), None)
        );
    }

    #[test]
    fn splits_queries_with_case_changing_characters() {
        assert_eq!(
            parse_search_query("İİİİİ by Émile Zola"),
            ("İİİİİ".to_string(), Some("Émile Zola".to_string()))
        );
        assert_eq!(
            parse_search_query("ΣΟΦΙΑ BY Ωmega"),
            ("ΣΟΦΙΑ".to_string(), Some("Ωmega".to_string()))
        );
        assert_eq!(
            parse_search_query("Straße - Ⅻ"),
            ("Straße".to_string(), Some("Ⅻ".to_string()))
        );
    }

    #[test]
    fn parses_openlibrary_docs() {
        let data = json!({
            "docs": [
                {
                    "title": "Dune",
                    "author_name": ["Frank Herbert"],
                    "number_of_pages_median": 604,
                    "isbn": ["not-an-isbn", "9780441013593"],
                    "cover_i": 11481354
                },
                { "title": "Dune Messiah", "author_name": [] }
            ]
        });
        let candidates = parse_openlibrary_docs(&data, 0.7);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title.as_deref(), Some("Dune"));
        assert_eq!(candidates[0].page_count, Some(604));
        assert_eq!(candidates[0].isbn.as_deref(), Some("9780441013593"));
        assert_eq!(
            candidates[0].cover_url.as_deref(),
            Some("https://covers.openlibrary.org/b/id/11481354-M.jpg")
        );
        assert!(candidates[1].confidence < candidates[0].confidence);
        assert!(candidates[1].authors.is_empty());
    }

    #[test]
    fn parses_google_volumes_preferring_isbn13() {
        let data = json!({
            "items": [{
                "volumeInfo": {
                    "title": "Les Misérables",
                    "authors": ["Victor Hugo"],
                    "pageCount": 1463,
                    "industryIdentifiers": [
                        { "type": "ISBN_10", "identifier": "0306406152" },
                        { "type": "ISBN_13", "identifier": "9780306406157" }
                    ],
                    "imageLinks": { "thumbnail": "http://books.google.com/cover.jpg" }
                }
            }]
        });
        let candidates = parse_google_volumes(&data, 0.85);
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.source, "google");
        assert_eq!(candidate.isbn.as_deref(), Some("9780306406157"));
        assert_eq!(
            candidate.cover_url.as_deref(),
            Some("https://books.google.com/cover.jpg")
        );
        assert_eq!(candidate.confidence, 0.85);
    }

    #[test]
    fn missing_payload_shapes_yield_nothing() {
        assert!(parse_openlibrary_docs(&json!({}), 0.9).is_empty());
        assert!(parse_google_volumes(&json!({ "totalItems": 0 }), 0.9).is_empty());
    }

    #[test]
    fn ranking_drops_untitled_and_sorts_by_confidence() {
        let make = |title: Option<&str>, confidence: f64| MetadataCandidate {
            source: "openlibrary",
            title: title.map(|value| value.to_string()),
            authors: vec![],
            page_count: None,
            isbn: None,
            cover_url: None,
            confidence,
        };
        let ranked = rank_candidates(vec![
            make(Some("low"), 0.4),
            make(None, 0.99),
            make(Some("high"), 0.8),
        ]);
        let titles: Vec<_> = ranked.iter().filter_map(|c| c.title.as_deref()).collect();
        assert_eq!(titles, vec!["high", "low"]);
    }

    #[test]
    fn candidate_becomes_new_book_only_when_complete() {
        let candidate = MetadataCandidate {
            source: "google",
            title: Some("Good Omens".to_string()),
            authors: vec!["Terry Pratchett".to_string(), "Neil Gaiman".to_string()],
            page_count: Some(412),
            isbn: Some("9780060853983".to_string()),
            cover_url: None,
            confidence: 0.8,
        };
        let book = candidate.clone().into_new_book().expect("complete candidate");
        assert_eq!(book.author, "Terry Pratchett, Neil Gaiman");
        assert_eq!(book.total_pages, 412);
        assert_eq!(book.isbn.as_deref(), Some("9780060853983"));

        let no_pages = MetadataCandidate {
            page_count: Some(0),
            ..candidate.clone()
        };
        assert!(no_pages.into_new_book().is_none());
        let no_authors = MetadataCandidate {
            authors: vec![" ".to_string()],
            ..candidate
        };
        assert!(no_authors.into_new_book().is_none());
    }

    #[test]
    fn source_selection_falls_back_to_openlibrary_when_all_disabled() {
        let selection = SourceSelection {
            open_library: false,
            google_books: false,
        }
        .with_fallback();
        assert!(selection.open_library);
    }

    #[test]
    fn invalid_isbn_skips_network() {
        assert!(lookup_isbn("not an isbn").is_empty());
    }

    #[test]
    #[ignore = "hits live catalogs, for manual debugging"]
    fn live_catalog_lookup() {
        let query = std::env::var("LIBRARY_LOOKUP_QUERY")
            .unwrap_or_else(|_| "Dune by Frank Herbert".to_string());
        for candidate in search(&query) {
            println!(
                "lookup source={} title={:?} authors={:?} pages={:?} isbn={:?} confidence={:.2}",
                candidate.source,
                candidate.title,
                candidate.authors,
                candidate.page_count,
                candidate.isbn,
                candidate.confidence
            );
        }
        for candidate in lookup_isbn("9780441013593") {
            println!("isbn hit {:?}", candidate.into_new_book());
        }
    }
}
