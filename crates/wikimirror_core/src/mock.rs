//! In-memory `WikiApi` used by the unit tests.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow, bail};

use crate::client::WikiApi;
use crate::metadata::PageRecord;
use crate::rpc::Value;

#[derive(Default)]
pub(crate) struct MockApi {
    pub pages: BTreeMap<String, PageRecord>,
    pub listing: Vec<String>,
    pub files: BTreeMap<String, Vec<(String, PageRecord)>>,
    pub blobs: BTreeMap<String, Vec<u8>>,
    pub failing_pages: BTreeSet<String>,
    pub failing_downloads: BTreeSet<String>,
    pub page_requests: Vec<String>,
    pub request_count: usize,
}

impl MockApi {
    pub fn insert_page(&mut self, remote_name: &str, record: PageRecord) {
        self.pages.insert(remote_name.to_string(), record);
    }

    pub fn insert_file(&mut self, remote_name: &str, file: &str, meta: PageRecord, blob: &[u8]) {
        if let Some(url) = meta.field_text("download_url") {
            self.blobs.insert(url, blob.to_vec());
        }
        self.files
            .entry(remote_name.to_string())
            .or_default()
            .push((file.to_string(), meta));
    }
}

impl WikiApi for MockApi {
    fn get_page(&mut self, page: &str) -> Result<PageRecord> {
        self.request_count += 1;
        self.page_requests.push(page.to_string());
        if self.failing_pages.contains(page) {
            bail!("connection reset while fetching {page}");
        }
        self.pages
            .get(page)
            .cloned()
            .ok_or_else(|| anyhow!("XML-RPC fault [406]: page {page} does not exist"))
    }

    fn list_pages_newest_first(&mut self) -> Result<Vec<String>> {
        self.request_count += 1;
        Ok(self.listing.clone())
    }

    fn list_files(&mut self, page: &str) -> Result<Vec<String>> {
        self.request_count += 1;
        Ok(self
            .files
            .get(page)
            .map(|files| files.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }

    fn get_file_meta(&mut self, page: &str, file: &str) -> Result<PageRecord> {
        self.request_count += 1;
        self.files
            .get(page)
            .and_then(|files| files.iter().find(|(name, _)| name == file))
            .map(|(_, meta)| meta.clone())
            .ok_or_else(|| anyhow!("no file {file} on {page}"))
    }

    fn download(&mut self, url: &str) -> Result<Vec<u8>> {
        self.request_count += 1;
        if self.failing_downloads.contains(url) {
            bail!("download of {url} failed with HTTP 503 Service Unavailable");
        }
        self.blobs
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("download of {url} failed with HTTP 404 Not Found"))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

pub(crate) fn page(
    content: Option<&str>,
    html: Option<&str>,
    updated_at: Option<&str>,
) -> PageRecord {
    let mut members = BTreeMap::new();
    if let Some(content) = content {
        members.insert("content".to_string(), Value::text(content));
    }
    if let Some(html) = html {
        members.insert("html".to_string(), Value::text(html));
    }
    members.insert(
        "updated_at".to_string(),
        updated_at.map(|stamp| Value::text(stamp)).unwrap_or(Value::Nil),
    );
    members.insert("title".to_string(), Value::text("Test page"));
    PageRecord::from_struct(members)
}

pub(crate) fn file_meta(name: &str, download_url: &str) -> PageRecord {
    let mut members = BTreeMap::new();
    members.insert("name".to_string(), Value::text(name));
    members.insert("download_url".to_string(), Value::text(download_url));
    members.insert("size".to_string(), Value::Int(1024));
    members.insert("mime_type".to_string(), Value::text("image/png"));
    PageRecord::from_struct(members)
}
