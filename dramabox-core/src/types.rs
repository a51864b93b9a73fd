//! Dramabox API data structures
//!
//! Records are decoded from the upstream leniently (ids as strings or numbers,
//! `null` for missing lists, several spellings of the same field) and always
//! serialized back with every key present.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Pagination parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page number (1-indexed)
    pub page: u32,
    /// Number of items per page
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Result<Self> {
        if page < 1 {
            return Err(Error::validation("page must be at least 1"));
        }
        if size < 1 {
            return Err(Error::validation("size must be at least 1"));
        }
        Ok(Self { page, size })
    }

    /// Same as [`PageRequest::new`] with an upper bound on `size`
    pub fn bounded(page: u32, size: u32, max_size: u32) -> Result<Self> {
        let request = Self::new(page, size)?;
        if request.size > max_size {
            return Err(Error::validation(format!("size must not exceed {max_size}")));
        }
        Ok(request)
    }
}

/// One page of results
///
/// `has_more` is whatever the upstream reported; it is not derived from the
/// item count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub page: u32,
    pub size: u32,
}

/// Book as it appears in listings and search results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    #[serde(default, deserialize_with = "de::string_or_number")]
    pub book_id: String,
    #[serde(default, alias = "name", deserialize_with = "de::null_as_default")]
    pub book_name: String,
    #[serde(default, alias = "coverWap", alias = "bookCover", deserialize_with = "de::null_as_default")]
    pub cover: String,
    #[serde(default, alias = "intro", alias = "description", deserialize_with = "de::null_as_default")]
    pub introduction: String,
    #[serde(default, alias = "tagNames", deserialize_with = "de::null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "de::lenient_u32")]
    pub chapter_count: u32,
    #[serde(default, deserialize_with = "de::optional_string_or_number")]
    pub play_count: Option<String>,
}

/// Full book record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDetail {
    #[serde(default, deserialize_with = "de::string_or_number")]
    pub book_id: String,
    #[serde(default, alias = "name", deserialize_with = "de::null_as_default")]
    pub book_name: String,
    #[serde(default, alias = "coverWap", alias = "bookCover", deserialize_with = "de::null_as_default")]
    pub cover: String,
    #[serde(default, alias = "intro", alias = "description", deserialize_with = "de::null_as_default")]
    pub introduction: String,
    #[serde(default, alias = "tagNames", deserialize_with = "de::null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "de::lenient_u32")]
    pub chapter_count: u32,
    #[serde(default, alias = "authorName", deserialize_with = "de::null_as_default")]
    pub author: String,
    #[serde(default, deserialize_with = "de::optional_string_or_number")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "de::optional_string_or_number")]
    pub view_count: Option<String>,
    #[serde(default, deserialize_with = "de::optional_string_or_number")]
    pub first_chapter_id: Option<String>,
}

/// Episode of a book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    #[serde(default, deserialize_with = "de::string_or_number")]
    pub chapter_id: String,
    /// 1-based episode number
    #[serde(default, alias = "chapterIndex", alias = "index", deserialize_with = "de::lenient_u32")]
    pub episode: u32,
    #[serde(default, alias = "name", deserialize_with = "de::null_as_default")]
    pub chapter_name: String,
    #[serde(default, alias = "chapterImg", deserialize_with = "de::null_as_default")]
    pub cover: String,
    #[serde(default, alias = "isCharge", deserialize_with = "de::lenient_bool")]
    pub is_charge: bool,
}

/// Playable location of one episode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamTarget {
    #[serde(default, deserialize_with = "de::string_or_number")]
    pub book_id: String,
    #[serde(default, deserialize_with = "de::string_or_number")]
    pub chapter_id: String,
    #[serde(default, alias = "chapterIndex", alias = "index", deserialize_with = "de::lenient_u32")]
    pub episode: u32,
    #[serde(default, alias = "videoUrl", alias = "playUrl", deserialize_with = "de::null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "de::optional_lenient_u32")]
    pub quality: Option<u32>,
    #[serde(default, alias = "chapterImg", deserialize_with = "de::null_as_default")]
    pub cover: String,
}

/// Catalog category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default, alias = "typeId", deserialize_with = "de::lenient_u32")]
    pub id: u32,
    #[serde(default, alias = "typeName", deserialize_with = "de::null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de::optional_string_or_number")]
    pub cover: Option<String>,
}

// ============================================================================
// Upstream wire shapes
// ============================================================================

/// Envelope wrapping every upstream JSON body
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default, deserialize_with = "de::lenient_i64")]
    status: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

const fn default_success() -> bool {
    true
}

impl<T> Envelope<T> {
    /// Unwrap the payload, turning an upstream-reported failure into an error
    pub(crate) fn into_data(self) -> Result<Option<T>> {
        if !self.success || self.status != 0 {
            return Err(Error::Api {
                code: self.status,
                message: self.message.unwrap_or_else(|| "upstream reported failure".to_string()),
            });
        }
        Ok(self.data)
    }
}

/// Keys a paginated payload may carry its items under, in lookup order
const PAGE_LIST_KEYS: &[&str] = &["list", "book", "searchList", "records", "bookList"];
const PAGE_MORE_KEYS: &[&str] = &["hasMore", "isMore"];

/// Decode a paginated payload, never handing back more than the caller asked
/// for.
///
/// Keys are probed in order, so a payload carrying several of them decodes
/// from the first non-null one.
pub(crate) fn page_from<T: DeserializeOwned>(data: Option<Value>, request: PageRequest) -> Result<PageResult<T>> {
    let has_more = match &data {
        Some(Value::Object(object)) => match PAGE_MORE_KEYS
            .iter()
            .find_map(|key| object.get(*key).filter(|value| !value.is_null()))
        {
            Some(value) => de::lenient_bool(value.clone())?,
            None => false,
        },
        _ => false,
    };

    let mut items: Vec<T> = list_from(data, PAGE_LIST_KEYS)?;
    items.truncate(request.size as usize);
    Ok(PageResult {
        items,
        has_more,
        page: request.page,
        size: request.size,
    })
}

/// Decode a list that the upstream sends either bare or wrapped in an object
/// under one of `keys`
pub(crate) fn list_from<T: DeserializeOwned>(data: Option<Value>, keys: &[&str]) -> Result<Vec<T>> {
    match data {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(serde_json::from_value(Value::Array(items))?),
        Some(Value::Object(mut object)) => {
            for key in keys {
                match object.remove(*key) {
                    Some(Value::Null) | None => {}
                    Some(list @ Value::Array(_)) => return Ok(serde_json::from_value(list)?),
                    Some(other) => {
                        return Err(Error::decode(format!("expected a list under `{key}`, got {other}")))
                    }
                }
            }
            Ok(Vec::new())
        }
        Some(other) => Err(Error::decode(format!("expected a list, got {other}"))),
    }
}

/// Decode a record that the upstream sends bare or nested under one of `keys`
pub(crate) fn record_from<T: DeserializeOwned>(data: Option<Value>, keys: &[&str]) -> Result<Option<T>> {
    match data {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(mut object)) => {
            for key in keys {
                if let Some(nested @ Value::Object(_)) = object.remove(*key) {
                    return Ok(Some(serde_json::from_value(nested)?));
                }
            }
            Ok(Some(serde_json::from_value(Value::Object(object))?))
        }
        Some(other) => Err(Error::decode(format!("expected an object, got {other}"))),
    }
}

/// Lenient field decoders
mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(optional_string_or_number(deserializer)?.unwrap_or_default())
    }

    pub fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected a string or number, got {other}"
            ))),
        }
    }

    pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0),
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| serde::de::Error::custom(format!("integer out of range: {n}"))),
            Value::String(s) if s.trim().is_empty() => Ok(0),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("expected an integer, got {s:?}"))),
            other => Err(serde::de::Error::custom(format!("expected an integer, got {other}"))),
        }
    }

    pub fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = lenient_i64(deserializer)?;
        u32::try_from(value)
            .map_err(|_| serde::de::Error::custom(format!("expected a non-negative integer, got {value}")))
    }

    pub fn optional_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            other => lenient_u32(other)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }

    pub fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
            Value::String(s) => Ok(matches!(s.trim(), "1" | "true" | "TRUE" | "True")),
            other => Err(serde::de::Error::custom(format!("expected a boolean, got {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_request_bounds() {
        assert!(PageRequest::new(1, 1).is_ok());
        assert!(matches!(PageRequest::new(0, 10), Err(Error::Validation(_))));
        assert!(matches!(PageRequest::new(1, 0), Err(Error::Validation(_))));
        assert!(PageRequest::bounded(1, 100, 100).is_ok());
        assert!(matches!(PageRequest::bounded(1, 101, 100), Err(Error::Validation(_))));
    }

    #[test]
    fn test_book_summary_normalizes_missing_fields() {
        let book: BookSummary = serde_json::from_value(json!({
            "bookId": 41000102902_u64,
            "name": "Sang Pewaris",
            "tags": null,
            "chapterCount": "62"
        }))
        .unwrap();

        assert_eq!(book.book_id, "41000102902");
        assert_eq!(book.book_name, "Sang Pewaris");
        assert_eq!(book.cover, "");
        assert!(book.tags.is_empty());
        assert_eq!(book.chapter_count, 62);
        assert_eq!(book.play_count, None);

        // every key is present on the way out
        let out = serde_json::to_value(&book).unwrap();
        for key in ["bookId", "bookName", "cover", "introduction", "tags", "chapterCount", "playCount"] {
            assert!(out.get(key).is_some(), "missing {key}");
        }
        assert_eq!(out["playCount"], Value::Null);
    }

    #[test]
    fn test_chapter_aliases() {
        let chapter: Chapter = serde_json::from_value(json!({
            "chapterId": "7001",
            "chapterIndex": 3,
            "chapterName": "EP 3",
            "isCharge": 1
        }))
        .unwrap();

        assert_eq!(chapter.episode, 3);
        assert!(chapter.is_charge);
        assert_eq!(chapter.cover, "");
    }

    #[test]
    fn test_envelope_failure_is_api_error() {
        let envelope: Envelope<Value> = serde_json::from_value(json!({
            "success": false,
            "status": 12,
            "message": "sign error"
        }))
        .unwrap();

        assert_eq!(
            envelope.into_data().unwrap_err(),
            Error::Api {
                code: 12,
                message: "sign error".to_string()
            }
        );
    }

    #[test]
    fn test_envelope_defaults_to_success() {
        let envelope: Envelope<Value> = serde_json::from_value(json!({"data": {"x": 1}})).unwrap();
        assert_eq!(envelope.into_data().unwrap(), Some(json!({"x": 1})));
    }

    #[test]
    fn test_page_from_truncates_to_size() {
        let data = json!({
            "book": [{"bookId": "1"}, {"bookId": "2"}, {"bookId": "3"}],
            "isMore": 1
        });

        let page: PageResult<BookSummary> = page_from(Some(data), PageRequest::new(2, 2).unwrap()).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.page, 2);
    }

    #[test]
    fn test_page_from_null_list() {
        let data = json!({"searchList": null, "isMore": false});
        let page: PageResult<BookSummary> = page_from(Some(data), PageRequest::new(1, 10).unwrap()).unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);

        let page: PageResult<BookSummary> = page_from(None, PageRequest::new(1, 10).unwrap()).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_page_from_several_list_keys_uses_first() {
        let data = json!({
            "list": null,
            "book": [{"bookId": "1"}, {"bookId": "2"}],
            "records": [{"bookId": "9"}],
            "hasMore": true,
            "isMore": 0
        });

        let page: PageResult<BookSummary> = page_from(Some(data), PageRequest::new(1, 10).unwrap()).unwrap();
        let ids: Vec<&str> = page.items.iter().map(|b| b.book_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(page.has_more);
    }

    #[test]
    fn test_list_from_variants() {
        let bare: Vec<Category> =
            list_from(Some(json!([{"typeId": 1, "typeName": "Romance"}])), &["list"]).unwrap();
        assert_eq!(bare[0].id, 1);
        assert_eq!(bare[0].name, "Romance");

        let wrapped: Vec<Category> =
            list_from(Some(json!({"classify": [{"id": "2", "name": "CEO"}]})), &["list", "classify"]).unwrap();
        assert_eq!(wrapped[0].id, 2);

        let empty: Vec<Category> = list_from(None, &["list"]).unwrap();
        assert!(empty.is_empty());

        let wrong: Result<Vec<Category>> = list_from(Some(json!("nope")), &["list"]);
        assert!(matches!(wrong, Err(Error::Decode(_))));
    }

    #[test]
    fn test_record_from_nested_and_bare() {
        let nested: Option<BookDetail> =
            record_from(Some(json!({"book": {"bookId": "9", "bookName": "A"}})), &["book"]).unwrap();
        assert_eq!(nested.unwrap().book_id, "9");

        let bare: Option<BookDetail> = record_from(Some(json!({"bookId": 10})), &["book"]).unwrap();
        assert_eq!(bare.unwrap().book_id, "10");

        let none: Option<BookDetail> = record_from(Some(Value::Null), &["book"]).unwrap();
        assert!(none.is_none());
    }
}
