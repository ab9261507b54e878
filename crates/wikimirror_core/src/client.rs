use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use crate::metadata::PageRecord;
use crate::rpc::{self, Value};

pub const ORDER_NEWEST_FIRST: &str = "updated_at desc";

/// Remote operations the mirror needs. Page names are in remote (`ns:page`) form.
pub trait WikiApi {
    fn get_page(&mut self, page: &str) -> Result<PageRecord>;
    /// Every page name on the site, most recently updated first.
    fn list_pages_newest_first(&mut self) -> Result<Vec<String>>;
    fn list_files(&mut self, page: &str) -> Result<Vec<String>>;
    /// Metadata for a single attached file, including its `download_url`.
    fn get_file_meta(&mut self, page: &str, file: &str) -> Result<PageRecord>;
    fn download(&mut self, url: &str) -> Result<Vec<u8>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct WikidotClientConfig {
    pub endpoint: String,
    pub site: String,
    pub api_key: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

pub struct WikidotClient {
    client: Client,
    endpoint: Url,
    site: String,
    user_agent: String,
    request_count: usize,
}

impl WikidotClient {
    pub fn new(config: WikidotClientConfig) -> Result<Self> {
        let endpoint = authenticated_endpoint(&config.endpoint, &config.site, &config.api_key)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Wikidot HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            site: config.site,
            user_agent: config.user_agent,
            request_count: 0,
        })
    }

    fn call(&mut self, method: &str, params: BTreeMap<String, Value>) -> Result<Value> {
        let body = rpc::encode_call(method, &[Value::Struct(params)])?;
        self.request_count += 1;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(USER_AGENT, self.user_agent.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .with_context(|| format!("failed to call Wikidot API method {method}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Wikidot API method {method} failed with HTTP {status}");
        }
        let text = response
            .text()
            .with_context(|| format!("failed to read {method} response"))?;
        rpc::decode_response(&text).with_context(|| format!("Wikidot API method {method} failed"))
    }

    fn site_params(&self) -> BTreeMap<String, Value> {
        let mut params = BTreeMap::new();
        params.insert("site".to_string(), Value::text(self.site.clone()));
        params
    }

    fn page_params(&self, page: &str) -> BTreeMap<String, Value> {
        let mut params = self.site_params();
        params.insert("page".to_string(), Value::text(page));
        params
    }
}

impl WikiApi for WikidotClient {
    fn get_page(&mut self, page: &str) -> Result<PageRecord> {
        let params = self.page_params(page);
        let members = self.call("pages.get_one", params)?.into_struct()?;
        Ok(PageRecord::from_struct(members))
    }

    fn list_pages_newest_first(&mut self) -> Result<Vec<String>> {
        let mut params = self.site_params();
        params.insert("order".to_string(), Value::text(ORDER_NEWEST_FIRST));
        self.call("pages.select", params)?
            .into_string_list()
            .context("failed to decode pages.select response")
    }

    fn list_files(&mut self, page: &str) -> Result<Vec<String>> {
        let params = self.page_params(page);
        self.call("files.select", params)?
            .into_string_list()
            .context("failed to decode files.select response")
    }

    fn get_file_meta(&mut self, page: &str, file: &str) -> Result<PageRecord> {
        let mut params = self.page_params(page);
        params.insert(
            "files".to_string(),
            Value::Array(vec![Value::text(file)]),
        );
        let mut by_name = self.call("files.get_meta", params)?.into_struct()?;
        let members = by_name
            .remove(file)
            .ok_or_else(|| anyhow!("files.get_meta returned no entry for {file} on {page}"))?
            .into_struct()?;
        Ok(PageRecord::from_struct(members))
    }

    fn download(&mut self, url: &str) -> Result<Vec<u8>> {
        self.request_count += 1;
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()
            .with_context(|| format!("failed to download {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("download of {url} failed with HTTP {status}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        Ok(bytes.to_vec())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// The API key travels as the password part of the endpoint URL, the site name as the user.
fn authenticated_endpoint(endpoint: &str, site: &str, api_key: &str) -> Result<Url> {
    let mut url =
        Url::parse(endpoint).with_context(|| format!("invalid Wikidot endpoint: {endpoint}"))?;
    if url.cannot_be_a_base() {
        bail!("invalid Wikidot endpoint: {endpoint}");
    }
    url.set_username(site)
        .map_err(|()| anyhow!("cannot set site name on endpoint {endpoint}"))?;
    url.set_password(Some(api_key))
        .map_err(|()| anyhow!("cannot set API key on endpoint {endpoint}"))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::authenticated_endpoint;

    #[test]
    fn endpoint_carries_site_and_key() {
        let url = authenticated_endpoint(
            "https://www.wikidot.com/xml-rpc-api.php",
            "fancyclopedia",
            "s3cret",
        )
        .expect("url");
        assert_eq!(url.username(), "fancyclopedia");
        assert_eq!(url.password(), Some("s3cret"));
        assert_eq!(url.host_str(), Some("www.wikidot.com"));
        assert_eq!(url.path(), "/xml-rpc-api.php");
    }

    #[test]
    fn endpoint_must_be_a_url() {
        assert!(authenticated_endpoint("not a url", "site", "key").is_err());
        assert!(authenticated_endpoint("mailto:someone@example.org", "site", "key").is_err());
    }
}
