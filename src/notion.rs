//! Notion as the content store: reading source posts and their block trees,
//! and writing translated copies back into the same database.

use crate::config::Config;
use crate::document::{concat_plain_text, Block, RichText, WriteBlock};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

pub const TITLE_PROPERTY: &str = "Property Name";
pub const SLUG_PROPERTY: &str = "Slug";
pub const DATE_PROPERTY: &str = "Date";
pub const LOCALE_PROPERTY: &str = "Locale";
pub const PUBLISHED_PROPERTY: &str = "Published";
pub const COVER_PROPERTY: &str = "Cover";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to reach Notion API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notion API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected Notion response: {0}")]
    Decode(String),
}

/// A page in the blog database.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

fn rich_text_property(value: &Value, key: &str) -> Option<String> {
    let runs: Vec<RichText> = serde_json::from_value(value.get(key)?.clone()).ok()?;
    let text = concat_plain_text(&runs).trim().to_string();
    (!text.is_empty()).then_some(text)
}

impl SourceRecord {
    pub fn title(&self) -> Option<String> {
        rich_text_property(self.properties.get(TITLE_PROPERTY)?, "title")
    }

    /// Content key shared by every locale of the same post.
    pub fn slug(&self) -> Option<String> {
        rich_text_property(self.properties.get(SLUG_PROPERTY)?, "rich_text")
    }

    pub fn locale(&self) -> Option<&str> {
        self.properties
            .get(LOCALE_PROPERTY)?
            .get("select")?
            .get("name")?
            .as_str()
    }

    pub fn published_on(&self) -> Option<NaiveDate> {
        let start = self
            .properties
            .get(DATE_PROPERTY)?
            .get("date")?
            .get("start")?
            .as_str()?;
        NaiveDate::parse_from_str(start.get(..10)?, "%Y-%m-%d").ok()
    }

    fn cover(&self) -> Option<&Value> {
        let cover = self.properties.get(COVER_PROPERTY)?;
        let has_files = cover
            .get("files")
            .and_then(Value::as_array)
            .is_some_and(|files| !files.is_empty());
        has_files.then_some(cover)
    }

    /// Properties for a translated copy of this record: new title and locale,
    /// published, with slug, date and cover copied over.
    pub fn translated_properties(&self, title: &str, locale: &str) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert(
            TITLE_PROPERTY.to_string(),
            json!({ "title": [{ "type": "text", "text": { "content": title } }] }),
        );
        for key in [SLUG_PROPERTY, DATE_PROPERTY] {
            if let Some(value) = self.properties.get(key) {
                properties.insert(key.to_string(), value.clone());
            }
        }
        properties.insert(
            LOCALE_PROPERTY.to_string(),
            json!({ "select": { "name": locale } }),
        );
        properties.insert(PUBLISHED_PROPERTY.to_string(), json!({ "checkbox": true }));
        if let Some(cover) = self.cover() {
            properties.insert(COVER_PROPERTY.to_string(), cover.clone());
        }
        properties
    }
}

/// Identifier of a newly created record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewRecord {
    pub id: String,
}

/// Reads and writes against the blog's content store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Published records in `locale`, newest first.
    async fn query_source_records(&self, locale: &str) -> Result<Vec<SourceRecord>, StoreError>;

    async fn get_record(&self, record_id: &str) -> Result<SourceRecord, StoreError>;

    /// The record's full block tree, children resolved.
    async fn get_blocks(&self, record_id: &str) -> Result<Vec<Block>, StoreError>;

    /// Locale tags of every record carrying `slug`.
    async fn existing_locales(&self, slug: &str) -> Result<Vec<String>, StoreError>;

    async fn create_record(
        &self,
        base: &SourceRecord,
        title: &str,
        locale: &str,
    ) -> Result<NewRecord, StoreError>;

    /// One append call under `parent_id`. Callers keep `blocks` within the
    /// batch limit and at most one level of embedded children.
    ///
    /// Returns the ids of the created blocks, in order.
    async fn append_blocks(
        &self,
        parent_id: &str,
        blocks: &[WriteBlock],
    ) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedBlock {
    id: String,
}

/// Notion REST API client.
#[derive(Debug, Clone)]
pub struct NotionClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    database_id: String,
}

impl NotionClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_url: config.notion_api_url.trim_end_matches('/').to_string(),
            token: config.notion_token.clone(),
            database_id: config.notion_database_id.clone(),
        }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, StoreError> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(StoreError::Api { status, body });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn query_database(
        &self,
        filter: Value,
        sorts: Option<Value>,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "filter": filter, "page_size": PAGE_SIZE });
            if let Some(sorts) = &sorts {
                body["sorts"] = sorts.clone();
            }
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }

            let page: Paginated<SourceRecord> = self
                .send(
                    self.request(
                        reqwest::Method::POST,
                        &format!("databases/{}/query", self.database_id),
                    )
                    .json(&body),
                )
                .await?;

            records.extend(page.results);
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => return Ok(records),
            }
        }
    }

    fn fetch_children<'a>(
        &'a self,
        block_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Block>, StoreError>> {
        Box::pin(async move {
            let mut blocks = Vec::new();
            let mut cursor: Option<String> = None;

            loop {
                let mut request = self
                    .request(reqwest::Method::GET, &format!("blocks/{}/children", block_id))
                    .query(&[("page_size", PAGE_SIZE.to_string())]);
                if let Some(cursor) = &cursor {
                    request = request.query(&[("start_cursor", cursor)]);
                }

                let page: Paginated<Value> = self.send(request).await?;

                for raw in page.results {
                    let has_children = raw
                        .get("has_children")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    let mut block: Block = serde_json::from_value(raw).map_err(|e| {
                        StoreError::Decode(format!("block under {}: {}", block_id, e))
                    })?;
                    if has_children {
                        let children = self.fetch_children(&block.id).await?;
                        block.children = children;
                    }
                    blocks.push(block);
                }

                match page.next_cursor {
                    Some(next) if page.has_more => cursor = Some(next),
                    _ => break,
                }
            }

            debug!("Fetched {} blocks under {}", blocks.len(), block_id);
            Ok(blocks)
        })
    }
}

#[async_trait]
impl ContentStore for NotionClient {
    async fn query_source_records(&self, locale: &str) -> Result<Vec<SourceRecord>, StoreError> {
        let filter = json!({
            "and": [
                { "property": LOCALE_PROPERTY, "select": { "equals": locale } },
                { "property": PUBLISHED_PROPERTY, "checkbox": { "equals": true } }
            ]
        });
        let sorts = json!([{ "property": DATE_PROPERTY, "direction": "descending" }]);
        self.query_database(filter, Some(sorts)).await
    }

    async fn get_record(&self, record_id: &str) -> Result<SourceRecord, StoreError> {
        self.send(self.request(reqwest::Method::GET, &format!("pages/{}", record_id)))
            .await
    }

    async fn get_blocks(&self, record_id: &str) -> Result<Vec<Block>, StoreError> {
        self.fetch_children(record_id).await
    }

    async fn existing_locales(&self, slug: &str) -> Result<Vec<String>, StoreError> {
        let filter = json!({ "property": SLUG_PROPERTY, "rich_text": { "equals": slug } });
        let records = self.query_database(filter, None).await?;

        let mut locales: Vec<String> = Vec::new();
        for locale in records.iter().filter_map(SourceRecord::locale) {
            if !locales.iter().any(|l| l == locale) {
                locales.push(locale.to_string());
            }
        }
        Ok(locales)
    }

    async fn create_record(
        &self,
        base: &SourceRecord,
        title: &str,
        locale: &str,
    ) -> Result<NewRecord, StoreError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": base.translated_properties(title, locale),
        });
        self.send(self.request(reqwest::Method::POST, "pages").json(&body))
            .await
    }

    async fn append_blocks(
        &self,
        parent_id: &str,
        blocks: &[WriteBlock],
    ) -> Result<Vec<String>, StoreError> {
        let body = json!({ "children": blocks });
        let created: Paginated<CreatedBlock> = self
            .send(
                self.request(reqwest::Method::PATCH, &format!("blocks/{}/children", parent_id))
                    .json(&body),
            )
            .await?;
        Ok(created.results.into_iter().map(|block| block.id).collect())
    }
}

static PAGE_ID_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Pull a compact page id out of a bare id, a dashed UUID or a notion.so URL.
pub fn extract_page_id(input: &str) -> Option<String> {
    let input = input.trim();
    let patterns = PAGE_ID_PATTERNS.get_or_init(|| {
        [
            r"(?i)^([a-f0-9]{32})$",
            r"(?i)notion\.(?:so|site)/.*-([a-f0-9]{32})",
            r"(?i)notion\.(?:so|site)/(?:[^/?#]+/)?([a-f0-9]{32})",
            r"(?i)([a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12})",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("page id pattern should compile"))
        .collect()
    });

    patterns
        .iter()
        .find_map(|regex| regex.captures(input))
        .map(|captures| captures[1].replace('-', "").to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;
    use crate::document::{to_creation_format, BlockKind};
    use crate::llm::tests::create_test_config;
    use wiremock::{
        matchers::{body_partial_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn record(properties: Value) -> SourceRecord {
        serde_json::from_value(json!({
            "object": "page",
            "id": "page-1",
            "properties": properties
        }))
        .unwrap()
    }

    fn sample_properties() -> Value {
        json!({
            "Property Name": { "id": "title", "type": "title", "title": [
                { "type": "text", "text": { "content": "Minha " }, "plain_text": "Minha " },
                { "type": "text", "text": { "content": "viagem" }, "plain_text": "viagem" }
            ]},
            "Slug": { "id": "s", "type": "rich_text", "rich_text": [
                {
                    "type": "text",
                    "text": { "content": "minha-viagem" },
                    "plain_text": "minha-viagem"
                }
            ]},
            "Date": { "id": "d", "type": "date", "date": { "start": "2024-03-10", "end": null } },
            "Locale": { "id": "l", "type": "select", "select": { "name": "pt-BR" } },
            "Published": { "id": "p", "type": "checkbox", "checkbox": true },
            "Cover": { "id": "c", "type": "files", "files": [
                {
                    "name": "capa.jpg",
                    "type": "external",
                    "external": { "url": "https://img.example/capa.jpg" }
                }
            ]}
        })
    }

    fn client_for(server: &MockServer) -> NotionClient {
        let mut config = create_test_config(LlmProvider::Anthropic, "http://unused");
        config.notion_api_url = server.uri();
        NotionClient::new(reqwest::Client::new(), &config)
    }

    // ==================== SourceRecord Tests ====================

    #[test]
    fn test_record_accessors() {
        let record = record(sample_properties());

        assert_eq!(record.title().as_deref(), Some("Minha viagem"));
        assert_eq!(record.slug().as_deref(), Some("minha-viagem"));
        assert_eq!(record.locale(), Some("pt-BR"));
        assert_eq!(record.published_on(), NaiveDate::from_ymd_opt(2024, 3, 10));
    }

    #[test]
    fn test_record_missing_fields() {
        let record = record(json!({
            "Property Name": { "title": [] },
            "Slug": { "rich_text": [{ "type": "text", "plain_text": "   " }] }
        }));

        assert!(record.title().is_none());
        assert!(record.slug().is_none());
        assert!(record.locale().is_none());
        assert!(record.published_on().is_none());
    }

    #[test]
    fn test_translated_properties() {
        let record = record(sample_properties());
        let properties = record.translated_properties("My trip", "en");

        assert_eq!(
            properties[TITLE_PROPERTY],
            json!({ "title": [{ "type": "text", "text": { "content": "My trip" } }] })
        );
        assert_eq!(properties[SLUG_PROPERTY], sample_properties()["Slug"]);
        assert_eq!(properties[DATE_PROPERTY], sample_properties()["Date"]);
        assert_eq!(properties[LOCALE_PROPERTY], json!({ "select": { "name": "en" } }));
        assert_eq!(properties[PUBLISHED_PROPERTY], json!({ "checkbox": true }));
        assert_eq!(properties[COVER_PROPERTY], sample_properties()["Cover"]);
    }

    #[test]
    fn test_translated_properties_skips_empty_cover() {
        let mut properties = sample_properties();
        properties["Cover"]["files"] = json!([]);
        let translated = record(properties).translated_properties("T", "es");

        assert!(!translated.contains_key(COVER_PROPERTY));
    }

    // ==================== Page ID Tests ====================

    #[test]
    fn test_extract_page_id_variants() {
        let id = "0123456789abcdef0123456789abcdef";

        assert_eq!(extract_page_id(id).as_deref(), Some(id));
        assert_eq!(
            extract_page_id(&format!("https://www.notion.so/My-Post-{}", id)).as_deref(),
            Some(id)
        );
        assert_eq!(
            extract_page_id(&format!("https://notion.so/{}", id)).as_deref(),
            Some(id)
        );
        assert_eq!(
            extract_page_id(&format!("https://www.notion.so/workspace/{}?pvs=4", id)).as_deref(),
            Some(id)
        );
        assert_eq!(
            extract_page_id("01234567-89ab-cdef-0123-456789abcdef").as_deref(),
            Some(id)
        );
        assert_eq!(
            extract_page_id("0123456789ABCDEF0123456789ABCDEF").as_deref(),
            Some(id)
        );
    }

    #[test]
    fn test_extract_page_id_rejects_garbage() {
        assert!(extract_page_id("not-a-page").is_none());
        assert!(extract_page_id("https://example.com/post").is_none());
        assert!(extract_page_id("").is_none());
    }

    // ==================== NotionClient Tests ====================

    #[tokio::test]
    async fn test_get_blocks_paginates_and_recurses() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/blocks/page-1/children"))
            .and(query_param("start_cursor", "cursor-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": "b2", "type": "divider", "has_children": false, "divider": {} }
                ],
                "has_more": false,
                "next_cursor": null
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/blocks/page-1/children"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(header("Authorization", "Bearer secret_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": "b1",
                    "type": "toggle",
                    "has_children": true,
                    "toggle": {
                        "rich_text": [{ "type": "text", "plain_text": "Mais" }],
                        "color": "default"
                    }
                }],
                "has_more": true,
                "next_cursor": "cursor-2"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/blocks/b1/children"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "id": "c1",
                    "type": "paragraph",
                    "has_children": false,
                    "paragraph": { "rich_text": [{ "type": "text", "plain_text": "Dentro" }] }
                }],
                "has_more": false,
                "next_cursor": null
            })))
            .mount(&server)
            .await;

        let blocks = client_for(&server).get_blocks("page-1").await.unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id, "b1");
        assert_eq!(blocks[0].children.len(), 1);
        assert_eq!(blocks[0].children[0].plain_text().as_deref(), Some("Dentro"));
        assert_eq!(blocks[1].kind, BlockKind::Divider);
    }

    #[tokio::test]
    async fn test_existing_locales_dedupes() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/databases/db123/query"))
            .and(body_partial_json(json!({
                "filter": { "property": "Slug", "rich_text": { "equals": "minha-viagem" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": "1", "properties": { "Locale": { "select": { "name": "pt-BR" } } } },
                    { "id": "2", "properties": { "Locale": { "select": { "name": "en" } } } },
                    { "id": "3", "properties": { "Locale": { "select": { "name": "en" } } } },
                    { "id": "4", "properties": { "Locale": { "select": null } } }
                ],
                "has_more": false,
                "next_cursor": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let locales = client_for(&server)
            .existing_locales("minha-viagem")
            .await
            .unwrap();
        assert_eq!(locales, vec!["pt-BR", "en"]);
    }

    #[tokio::test]
    async fn test_query_source_records_filters_locale() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/databases/db123/query"))
            .and(body_partial_json(json!({
                "sorts": [{ "property": "Date", "direction": "descending" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "id": "page-1", "properties": sample_properties() }],
                "has_more": false,
                "next_cursor": null
            })))
            .mount(&server)
            .await;

        let records = client_for(&server)
            .query_source_records("pt-BR")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].slug().as_deref(), Some("minha-viagem"));
    }

    #[tokio::test]
    async fn test_create_record_posts_parent_and_properties() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/pages"))
            .and(body_partial_json(json!({
                "parent": { "database_id": "db123" },
                "properties": {
                    "Locale": { "select": { "name": "fr" } },
                    "Published": { "checkbox": true }
                }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "object": "page", "id": "new-page" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let created = client_for(&server)
            .create_record(&record(sample_properties()), "Mon voyage", "fr")
            .await
            .unwrap();
        assert_eq!(created.id, "new-page");
    }

    #[tokio::test]
    async fn test_append_blocks_sends_children() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/blocks/new-page/children"))
            .and(body_partial_json(json!({
                "children": [{ "object": "block", "type": "divider", "divider": {} }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "results": [{ "object": "block", "id": "blk-1", "type": "divider", "divider": {} }],
                "has_more": false,
                "next_cursor": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let blocks = vec![to_creation_format(&Block::new("d", BlockKind::Divider), None)];
        let ids = client_for(&server)
            .append_blocks("new-page", &blocks)
            .await
            .unwrap();
        assert_eq!(ids, vec!["blk-1"]);
    }

    #[tokio::test]
    async fn test_api_error_surfaces_status_and_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/pages/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"code":"object_not_found"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).get_record("missing").await.unwrap_err();
        match err {
            StoreError::Api { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("object_not_found"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
