//! Link metadata extraction - fetches a page and picks a title, description
//! and thumbnail from its markup.
//!
//! Each field is chosen by a fixed fallback chain: curated social-preview
//! tags first, generic markup last. The auxiliary collections (images, icons,
//! Open Graph and raw meta tags) are captured in full, in document order.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::ExtractError;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Embedded images must exceed this on both sides to be a thumbnail candidate
const MIN_IMAGE_SIDE: u32 = 100;

/// Maximum page body read for extraction (1MB)
const MAX_PAGE_SIZE: usize = 1024 * 1024;

/// Preferred icon sizes, best first
const ICON_SIZES: [&str; 2] = ["192x192", "128x128"];

/// Link preview metadata for one URL.
///
/// Serialized with the field names the host page reads from its
/// `urldata` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub url: String,
    pub thumbnail: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "html_images")]
    pub images: Vec<PageImage>,
    #[serde(rename = "html_icons")]
    pub icons: Vec<PageIcon>,
    #[serde(rename = "html_og")]
    pub open_graph: Vec<OpenGraphTag>,
    #[serde(rename = "html_meta")]
    pub meta_tags: Vec<MetaTag>,
    #[serde(rename = "headers")]
    pub response_headers: String,
    #[serde(rename = "is_webpage")]
    pub is_web_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImage {
    pub src: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "alt")]
    pub alt_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageIcon {
    pub href: String,
    pub rel: String,
    pub sizes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenGraphTag {
    pub property: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaTag {
    pub name: String,
    pub content: String,
}

/// Anything that can produce a [`MetadataRecord`] for a URL.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn extract(&self, url: &str) -> Result<MetadataRecord, ExtractError>;
}

/// Fetches pages over HTTP and parses them with [`parse_document`].
#[derive(Clone)]
pub struct MetadataExtractor {
    client: Client,
}

impl MetadataExtractor {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetadataSource for MetadataExtractor {
    /// Fetch `url` once and derive its metadata record.
    async fn extract(&self, url: &str) -> Result<MetadataRecord, ExtractError> {
        debug!("Fetching metadata for {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_HTML)
            .send()
            .await
            .map_err(|e| ExtractError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::fetch(url, format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty() && !is_html(&content_type) {
            return Err(ExtractError::fetch(
                url,
                format!("not an HTML page ({})", content_type),
            ));
        }

        let headers = header_blob(response.headers());
        let body = read_capped(response, MAX_PAGE_SIZE)
            .await
            .map_err(|e| ExtractError::fetch(url, e))?;

        let html = decode_markup(url, &body)?;
        let record = parse_document(url, &html, headers);

        debug!(
            "Metadata for {}: title={:?}, thumbnail={:?}, description={:?}",
            url, record.title, record.thumbnail, record.description
        );

        Ok(record)
    }
}

fn is_html(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
}

/// Read at most `limit` bytes of the body. The rest is never pulled off
/// the connection.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> reqwest::Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            debug!("Page body truncated at {} bytes", limit);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Turn a response body into markup text.
///
/// Empty and binary bodies cannot produce a document.
fn decode_markup(url: &str, body: &[u8]) -> Result<String, ExtractError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ExtractError::parse(url, "empty document"));
    }
    if body.iter().take(1024).any(|b| *b == 0) {
        return Err(ExtractError::parse(url, "binary content"));
    }
    Ok(String::from_utf8_lossy(body).into_owned())
}

/// Render response headers as a `name: value` CRLF-separated blob.
fn header_blob(headers: &HeaderMap) -> String {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| format!("{}: {}\r\n", name.as_str(), v))
        })
        .collect()
}

/// Parse markup fetched from `url` into a metadata record.
pub fn parse_document(url: &str, html: &str, response_headers: String) -> MetadataRecord {
    let document = Html::parse_document(html);
    let base = document_base(&document, url);

    let images = collect_images(&document, base.as_ref());
    let icons = collect_icons(&document, base.as_ref());
    let open_graph = collect_open_graph(&document);
    let meta_tags = collect_meta_tags(&document);

    let thumbnail = first_content(&document, r#"meta[property="og:image"]"#)
        .or_else(|| first_content(&document, r#"meta[name="twitter:image"]"#))
        .or_else(|| sized_icon(&document, base.as_ref(), ICON_SIZES[0]))
        .or_else(|| sized_icon(&document, base.as_ref(), ICON_SIZES[1]))
        .or_else(|| large_image(&images));

    let title = title_text(&document)
        .or_else(|| first_content(&document, r#"meta[property="og:title"]"#));

    let description = first_content(&document, r#"meta[name="description"]"#)
        .or_else(|| first_content(&document, r#"meta[property="og:description"]"#));

    MetadataRecord {
        url: url.to_string(),
        thumbnail,
        title,
        description,
        images,
        icons,
        open_graph,
        meta_tags,
        response_headers,
        is_web_page: true,
    }
}

fn select<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn attr(element: &ElementRef, name: &str) -> String {
    element.value().attr(name).unwrap_or("").to_string()
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Page URL, overridden by a `<base href>` when present
fn document_base(document: &Html, url: &str) -> Option<Url> {
    let page = Url::parse(url).ok()?;
    let base_href = select(document, "base[href]")
        .first()
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| page.join(href).ok());
    Some(base_href.unwrap_or(page))
}

/// Resolve a URL attribute the way the document would. Missing attributes stay empty.
fn resolve(base: Option<&Url>, value: Option<&str>) -> String {
    match (base, value) {
        (_, None) => String::new(),
        (Some(base), Some(value)) => base
            .join(value.trim())
            .map(|u| u.to_string())
            .unwrap_or_else(|_| value.to_string()),
        (None, Some(value)) => value.to_string(),
    }
}

/// Leading integer of a dimension attribute (`"120px"` is 120), 0 otherwise
fn parse_dimension(value: Option<&str>) -> u32 {
    let digits: String = value
        .unwrap_or("")
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Content of the first element matching `css`, if non-empty.
///
/// Only the first match is consulted; an empty one falls through to the
/// next tier rather than to a later element.
fn first_content(document: &Html, css: &str) -> Option<String> {
    select(document, css)
        .first()
        .and_then(|meta| non_empty(attr(meta, "content")))
}

fn title_text(document: &Html) -> Option<String> {
    select(document, "title")
        .first()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .and_then(non_empty)
}

fn sized_icon(document: &Html, base: Option<&Url>, sizes: &str) -> Option<String> {
    let css = format!(r#"link[rel*="icon"][sizes="{}"]"#, sizes);
    select(document, &css)
        .first()
        .and_then(|link| non_empty(resolve(base, link.value().attr("href"))))
}

fn large_image(images: &[PageImage]) -> Option<String> {
    images
        .iter()
        .find(|img| img.width > MIN_IMAGE_SIDE && img.height > MIN_IMAGE_SIDE)
        .and_then(|img| non_empty(img.src.clone()))
}

fn collect_images(document: &Html, base: Option<&Url>) -> Vec<PageImage> {
    select(document, "img")
        .iter()
        .map(|img| PageImage {
            src: resolve(base, img.value().attr("src")),
            width: parse_dimension(img.value().attr("width")),
            height: parse_dimension(img.value().attr("height")),
            alt_text: attr(img, "alt"),
        })
        .collect()
}

fn collect_icons(document: &Html, base: Option<&Url>) -> Vec<PageIcon> {
    select(document, r#"link[rel*="icon"]"#)
        .iter()
        .map(|link| PageIcon {
            href: resolve(base, link.value().attr("href")),
            rel: attr(link, "rel"),
            sizes: link.value().attr("sizes").map(str::to_string),
        })
        .collect()
}

fn collect_open_graph(document: &Html) -> Vec<OpenGraphTag> {
    select(document, r#"meta[property^="og:"]"#)
        .iter()
        .map(|meta| OpenGraphTag {
            property: attr(meta, "property"),
            content: attr(meta, "content"),
        })
        .collect()
}

fn collect_meta_tags(document: &Html) -> Vec<MetaTag> {
    select(document, "meta")
        .iter()
        .map(|meta| MetaTag {
            name: attr(meta, "name"),
            content: attr(meta, "content"),
        })
        .collect()
}
