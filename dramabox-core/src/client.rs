//! Dramabox content client

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ContentConfig, Endpoint, Endpoints};
use crate::error::{Error, Result};
use crate::signer::{RequestSigner, SignedHeaders};
use crate::token::{Token, TokenManager};
use crate::transport::Transport;
use crate::types::{
    list_from, page_from, record_from, BookDetail, BookSummary, Category, Chapter, Envelope,
    PageRequest, PageResult, StreamTarget,
};
use crate::validation::{sanitize_keyword, validate_book_id, validate_episode};

/// Outcome of resolving every episode of a book
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub book_id: String,
    /// Resolved targets, in episode order
    pub targets: Vec<StreamTarget>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub episode: u32,
    pub code: &'static str,
    pub message: String,
}

/// Snapshot of the headers a request would carry right now
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderDebug {
    pub language: String,
    pub timestamp: i64,
    pub headers: SignedHeaders,
    pub token_info: TokenInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub device_id: String,
    pub valid_until: DateTime<Utc>,
}

/// Client for one language. Obtain through [`crate::ClientRegistry`].
pub struct DramaboxClient {
    language: String,
    tokens: TokenManager,
    signer: Arc<dyn RequestSigner>,
    transport: Arc<Transport>,
    clock: Arc<dyn Clock>,
    endpoints: Endpoints,
    content: ContentConfig,
}

impl DramaboxClient {
    pub fn new(
        tokens: TokenManager,
        signer: Arc<dyn RequestSigner>,
        transport: Arc<Transport>,
        clock: Arc<dyn Clock>,
        endpoints: Endpoints,
        content: ContentConfig,
    ) -> Self {
        Self {
            language: tokens.language().to_string(),
            tokens,
            signer,
            transport,
            clock,
            endpoints,
            content,
        }
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub async fn get_token(&self) -> Result<Arc<Token>> {
        self.tokens.get_token().await
    }

    #[must_use]
    pub fn build_headers(&self, token: &Token, timestamp: i64) -> SignedHeaders {
        self.signer.build_headers(token, timestamp)
    }

    /// Headers for a request made now, with the token they were derived from
    pub async fn debug_headers(&self) -> Result<HeaderDebug> {
        let token = self.get_token().await?;
        let timestamp = self.clock.timestamp_millis();
        Ok(HeaderDebug {
            language: self.language.clone(),
            timestamp,
            headers: self.build_headers(&token, timestamp),
            token_info: TokenInfo {
                device_id: token.device_id().to_string(),
                valid_until: token.expiry(),
            },
        })
    }

    pub async fn search(&self, keyword: &str, page: u32, size: u32) -> Result<PageResult<BookSummary>> {
        let keyword = sanitize_keyword(keyword, self.content.max_keyword_len)?;
        let request = self.page_request(page, size)?;
        let params = json!({
            "keyword": keyword,
            "pageNo": request.page,
            "pageSize": request.size,
        });
        let data = self.call(&self.endpoints.search, &params).await?;
        page_from(data, request)
    }

    pub async fn list_home(&self, page: u32, size: u32) -> Result<PageResult<BookSummary>> {
        let request = self.page_request(page, size)?;
        let params = json!({
            "pageNo": request.page,
            "pageSize": request.size,
            "channelId": self.endpoints.home_channel_id,
        });
        let data = self.call(&self.endpoints.home, &params).await?;
        page_from(data, request)
    }

    pub async fn list_vip(&self) -> Result<Vec<BookSummary>> {
        let data = self.call(&self.endpoints.vip, &json!({})).await?;
        list_from(data, &["book", "list", "bookList"])
    }

    pub async fn get_detail(&self, book_id: &str) -> Result<BookDetail> {
        let book_id = validate_book_id(book_id)?;
        let data = self
            .call(&self.endpoints.detail, &json!({ "bookId": book_id }))
            .await?;

        match record_from::<BookDetail>(data, &["book", "bookInfo"])? {
            Some(detail) if !detail.book_id.is_empty() => Ok(detail),
            _ => Err(Error::not_found(format!("book {book_id}"))),
        }
    }

    pub async fn get_chapters(&self, book_id: &str) -> Result<Vec<Chapter>> {
        let book_id = validate_book_id(book_id)?;
        self.chapters(&book_id).await
    }

    pub async fn get_stream_url(&self, book_id: &str, episode: u32) -> Result<StreamTarget> {
        let book_id = validate_book_id(book_id)?;
        let episode = validate_episode(episode)?;
        self.stream_target(&book_id, episode).await
    }

    /// Resolve every episode of a book, keeping only the ones that resolve
    pub async fn batch_download(&self, book_id: &str) -> Result<Vec<StreamTarget>> {
        Ok(self.batch_download_report(book_id).await?.targets)
    }

    /// Like [`Self::batch_download`], also reporting per-episode failures
    pub async fn batch_download_report(&self, book_id: &str) -> Result<BatchReport> {
        let book_id = validate_book_id(book_id)?;
        let chapters = self.chapters(&book_id).await?;
        let episodes = episode_numbers(&chapters);

        let total = episodes.len();
        let book = book_id.as_str();
        let results: Vec<(u32, Result<StreamTarget>)> = stream::iter(episodes)
            .map(|episode| async move { (episode, self.stream_target(book, episode).await) })
            .buffered(self.content.batch_concurrency.max(1))
            .collect()
            .await;

        let mut targets = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (episode, result) in results {
            match result {
                Ok(target) => targets.push(target),
                Err(e) => {
                    warn!(book_id = %book_id, episode, error = %e, "Skipping unresolved episode");
                    failures.push(BatchFailure {
                        episode,
                        code: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            book_id = %book_id,
            total,
            resolved = targets.len(),
            failed = failures.len(),
            "Batch download resolved"
        );

        Ok(BatchReport {
            book_id,
            targets,
            failures,
        })
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>> {
        let data = self.call(&self.endpoints.categories, &json!({})).await?;
        list_from(data, &["classifyList", "types", "list"])
    }

    pub async fn list_by_category(
        &self,
        category_id: u32,
        page: u32,
        size: u32,
    ) -> Result<PageResult<BookSummary>> {
        if category_id == 0 {
            return Err(Error::validation("category id must be positive"));
        }
        let request = self.page_request(page, size)?;
        let params = json!({
            "typeId": category_id,
            "pageNo": request.page,
            "pageSize": request.size,
        });
        let data = self.call(&self.endpoints.category_books, &params).await?;
        page_from(data, request)
    }

    pub async fn list_recommended(&self) -> Result<Vec<BookSummary>> {
        let data = self.call(&self.endpoints.recommended, &json!({})).await?;
        list_from(data, &["recommendList", "book", "list"])
    }

    fn page_request(&self, page: u32, size: u32) -> Result<PageRequest> {
        PageRequest::bounded(page, size, self.content.max_page_size)
    }

    async fn chapters(&self, book_id: &str) -> Result<Vec<Chapter>> {
        let data = self
            .call(&self.endpoints.chapters, &json!({ "bookId": book_id }))
            .await?;
        list_from(data, &["chapterList", "list"])
    }

    async fn stream_target(&self, book_id: &str, episode: u32) -> Result<StreamTarget> {
        let data = self
            .call(
                &self.endpoints.stream,
                &json!({ "bookId": book_id, "index": episode }),
            )
            .await?;

        let mut target = record_from::<StreamTarget>(data, &["chapter", "playInfo"])?
            .unwrap_or_default();
        if target.url.is_empty() {
            return Err(Error::not_found(format!(
                "no stream for book {book_id} episode {episode}"
            )));
        }
        if target.book_id.is_empty() {
            target.book_id = book_id.to_string();
        }
        if target.episode == 0 {
            target.episode = episode;
        }
        Ok(target)
    }

    /// Fresh signed headers for one attempt, remembering the token they carry
    async fn signed_headers(&self, used: &Mutex<Option<Arc<Token>>>) -> Result<HeaderMap> {
        let token = self.tokens.get_token().await?;
        let timestamp = self.clock.timestamp_millis();
        let headers = self.signer.build_headers(&token, timestamp).to_header_map()?;
        *used.lock() = Some(token);
        Ok(headers)
    }

    /// Signed call returning the envelope payload
    async fn call(&self, endpoint: &Endpoint, params: &Value) -> Result<Option<Value>> {
        debug!(language = %self.language, path = %endpoint.path, "Calling upstream");

        let used = Mutex::new(None);
        let response = self
            .transport
            .request_with_retry(
                endpoint.method,
                &endpoint.path,
                params,
                self.transport.timeout(),
                || self.signed_headers(&used),
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                if e.is_unauthorized() {
                    if let Some(rejected) = used.lock().take() {
                        self.tokens.invalidate(&rejected);
                    }
                }
                return Err(e);
            }
        };

        let envelope: Envelope<Value> = response.json()?;
        envelope.into_data()
    }
}

/// Episode to request for each chapter.
///
/// The reported numbers are used only when every chapter has one and they are
/// all distinct; otherwise the whole list falls back to 1-based positions.
fn episode_numbers(chapters: &[Chapter]) -> Vec<u32> {
    let mut seen = HashSet::with_capacity(chapters.len());
    let reported = chapters
        .iter()
        .all(|chapter| chapter.episode > 0 && seen.insert(chapter.episode));

    if reported {
        chapters.iter().map(|chapter| chapter.episode).collect()
    } else {
        (1..=chapters.len())
            .map(|position| u32::try_from(position).unwrap_or(u32::MAX))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapters(episodes: &[u32]) -> Vec<Chapter> {
        episodes
            .iter()
            .map(|&episode| Chapter {
                episode,
                ..Chapter::default()
            })
            .collect()
    }

    #[test]
    fn test_episode_numbers_keep_reported_order() {
        assert_eq!(episode_numbers(&chapters(&[1, 2, 3])), vec![1, 2, 3]);
        assert_eq!(episode_numbers(&chapters(&[5, 7, 6])), vec![5, 7, 6]);
    }

    #[test]
    fn test_episode_numbers_zero_based_list_uses_positions() {
        assert_eq!(episode_numbers(&chapters(&[0, 1, 2])), vec![1, 2, 3]);
    }

    #[test]
    fn test_episode_numbers_duplicates_use_positions() {
        assert_eq!(episode_numbers(&chapters(&[1, 1, 2])), vec![1, 2, 3]);
        assert_eq!(episode_numbers(&chapters(&[0, 0])), vec![1, 2]);
        assert!(episode_numbers(&[]).is_empty());
    }
}
