//! Remote catalog client
//!
//! Talks to the marketplace gateway: product details and search, update
//! lists, changelogs and artifact downloads. Requests are form POSTs; when
//! a key and secret are configured every request also carries a nonce and
//! a `Rest-Sign` header:
//!
//! `base64(HMAC-SHA512(form_urlencoded(sorted params), base64_decode(secret)))`
//!
//! Responses must be status 200 with a JSON object or array body. Each
//! failure shape has its own message.

mod transport;

pub use transport::{FormField, Header, HttpTransport, Transport, TransportResponse};

#[cfg(test)]
pub use transport::MockTransport;

use crate::archive::ArchiveExtractor;
use crate::cache::FileCache;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use plinth_core::types::CatalogConfig;
use plinth_core::{Error, Result};
use ring::hmac;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROTOCOL_VERSION: &str = "1.1";
pub const CLIENT_NAME: &str = "plinth";

pub const RESPONSE_NOT_FOUND: &str = "The catalog server could not find the requested resource.";
pub const RESPONSE_EMPTY: &str = "The catalog server returned an empty response.";
pub const RESPONSE_INVALID: &str = "The catalog server returned an invalid response.";
pub const FILE_CORRUPT: &str = "The downloaded file failed its integrity check.";

/// Body the gateway sends with a 200 for unknown packages
const PACKAGE_NOT_FOUND: &str = "Package not found";

/// Named detail requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogRequest {
    PluginDetail,
    PluginContent,
    ThemeDetail,
    ProjectDetail,
}

impl CatalogRequest {
    pub fn path(&self) -> &'static str {
        match self {
            Self::PluginDetail => "plugin/detail",
            Self::PluginContent => "plugin/content",
            Self::ThemeDetail => "theme/detail",
            Self::ProjectDetail => "project/detail",
        }
    }

    /// Form field carrying the identifier
    fn identifier_field(&self) -> &'static str {
        match self {
            Self::ProjectDetail => "id",
            _ => "name",
        }
    }
}

/// Product families the marketplace sells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductType {
    #[default]
    Plugin,
    Theme,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Theme => "theme",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature over request parameters, keyed by the base64-decoded secret
pub fn sign(params: &BTreeMap<String, String>, secret: &str) -> Result<String> {
    let key = STANDARD
        .decode(secret.trim())
        .map_err(|_| Error::invalid_config("catalog secret is not valid base64"))?;

    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish();

    let key = hmac::Key::new(hmac::HMAC_SHA512, &key);
    let tag = hmac::sign(&key, query.as_bytes());
    Ok(STANDARD.encode(tag.as_ref()))
}

/// Interpret a gateway response: status first, then JSON shape
pub fn interpret(response: TransportResponse) -> Result<Value> {
    let code = if response.body == PACKAGE_NOT_FOUND {
        500
    } else {
        response.code
    };

    if code == 404 {
        return Err(Error::remote_catalog(RESPONSE_NOT_FOUND));
    }
    if code != 200 {
        return Err(Error::remote_catalog(if response.body.is_empty() {
            RESPONSE_EMPTY.to_string()
        } else {
            response.body
        }));
    }

    match serde_json::from_str::<Value>(&response.body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Ok(value),
        _ => Err(Error::remote_catalog(RESPONSE_INVALID)),
    }
}

/// Client for the marketplace gateway
pub struct CatalogClient {
    transport: Box<dyn Transport>,
    server_url: String,
    credentials: Option<(String, String)>,
    edge: bool,
    project_id: Option<String>,
    temp_dir: PathBuf,
    cache: FileCache,
    product_ttl: Duration,
    popular_ttl: Duration,
    last_nonce: Cell<u128>,
}

impl CatalogClient {
    /// `storage_dir` holds downloads (`temp/`) and the product cache (`cache/catalog.json`)
    pub fn new(config: &CatalogConfig, transport: Box<dyn Transport>, storage_dir: &Path) -> Self {
        let mut server_url = config.server_url.clone();
        if !server_url.ends_with('/') {
            server_url.push('/');
        }

        Self {
            transport,
            server_url,
            credentials: config
                .credentials()
                .map(|(key, secret)| (key.to_string(), secret.to_string())),
            edge: config.edge_updates,
            project_id: None,
            temp_dir: storage_dir.join("temp"),
            cache: FileCache::open(storage_dir.join("cache").join("catalog.json")),
            product_ttl: Duration::hours(config.product_cache_ttl_hours),
            popular_ttl: Duration::minutes(config.popular_cache_ttl_minutes),
            last_nonce: Cell::new(0),
        }
    }

    /// Build a client over HTTP
    pub fn http(config: &CatalogConfig, storage_dir: &Path) -> Result<Self> {
        let transport = HttpTransport::new(config).map_err(|e| Error::remote_catalog(format!("{:#}", e)))?;
        Ok(Self::new(config, Box::new(transport), storage_dir))
    }

    /// Attach the linked project id to every request
    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn server_url(&self, uri: &str) -> String {
        format!("{}{}", self.server_url, uri.trim_start_matches('/'))
    }

    /// Seconds and microseconds concatenated, strictly increasing per client
    fn next_nonce(&self) -> u128 {
        let now = Utc::now();
        let candidate = now.timestamp() as u128 * 1_000_000 + u128::from(now.timestamp_subsec_micros());
        let nonce = candidate.max(self.last_nonce.get() + 1);
        self.last_nonce.set(nonce);
        nonce
    }

    /// Add protocol fields, and the nonce plus signing headers when credentialed
    fn prepare(&self, mut params: BTreeMap<String, String>) -> Result<(Vec<Header>, Vec<FormField>)> {
        params.insert("protocol_version".into(), PROTOCOL_VERSION.into());
        params.insert("client".into(), CLIENT_NAME.into());
        if let Some(project) = &self.project_id {
            params.insert("project".into(), project.clone());
        }
        if self.edge {
            params.insert("edge".into(), "1".into());
        }

        let mut headers = Vec::new();
        if let Some((key, secret)) = &self.credentials {
            params.insert("nonce".into(), self.next_nonce().to_string());
            headers.push(("Rest-Key".to_string(), key.clone()));
            headers.push(("Rest-Sign".to_string(), sign(&params, secret)?));
        }

        Ok((headers, params.into_iter().collect()))
    }

    /// POST to the gateway and validate the response
    pub fn fetch(&self, uri: &str, params: BTreeMap<String, String>) -> Result<Value> {
        let url = self.server_url(uri);
        let (headers, form) = self.prepare(params)?;
        debug!("Catalog request {}", uri);

        let response = self
            .transport
            .post(&url, &headers, &form)
            .map_err(|e| Error::remote_catalog(format!("{:#}", e)))?;
        interpret(response)
    }

    /// Detail request for a plugin, theme or project
    pub fn request(&self, request: CatalogRequest, identifier: &str) -> Result<Value> {
        let mut params = BTreeMap::new();
        params.insert(request.identifier_field().to_string(), identifier.to_string());
        self.fetch(request.path(), params)
    }

    pub fn project_detail(&self, project_id: &str) -> Result<Value> {
        self.request(CatalogRequest::ProjectDetail, project_id)
    }

    pub fn search(&self, query: &str, product: ProductType) -> Result<Value> {
        let mut params = BTreeMap::new();
        params.insert("query".to_string(), query.to_string());
        self.fetch(&format!("{}/search", product), params)
    }

    /// Ask for the update list of the given installation state
    pub fn update_list(&self, params: BTreeMap<String, String>) -> Result<Value> {
        self.fetch("core/update", params)
    }

    fn product_cache_key(product: ProductType) -> String {
        format!("products.{}", product)
    }

    fn product_cache(&self, product: ProductType) -> BTreeMap<String, Option<Value>> {
        self.cache
            .get(&Self::product_cache_key(product))
            .unwrap_or_default()
    }

    fn save_product_cache(&mut self, product: ProductType, products: &BTreeMap<String, Option<Value>>) -> Result<()> {
        self.cache
            .put(&Self::product_cache_key(product), products, self.product_ttl)
    }

    /// Details for the given product codes. Codes the gateway does not know
    /// are remembered as unknown and left out of the result.
    pub fn product_details(&mut self, codes: &[String], product: ProductType) -> Result<Vec<Value>> {
        let mut products = self.product_cache(product);

        let missing: Vec<&String> = codes.iter().filter(|c| !products.contains_key(*c)).collect();
        if !missing.is_empty() {
            let params: BTreeMap<String, String> = missing
                .iter()
                .enumerate()
                .map(|(i, code)| (format!("names[{}]", i), code.to_string()))
                .collect();
            let data = self.fetch(&format!("{}/details", product), params)?;

            for item in list_items(&data) {
                if let Some(code) = item.get("code").and_then(Value::as_str) {
                    products.insert(code.to_string(), Some(item.clone()));
                }
            }
            for code in missing {
                products.entry(code.clone()).or_insert(None);
            }
            self.save_product_cache(product, &products)?;
        }

        Ok(codes
            .iter()
            .filter_map(|code| products.get(code).cloned().flatten())
            .collect())
    }

    /// Popular products, cached for a short while
    pub fn popular_products(&mut self, product: ProductType) -> Result<Vec<Value>> {
        let key = format!("popular.{}", product);
        if let Some(cached) = self.cache.get::<Vec<Value>>(&key) {
            return Ok(cached);
        }

        let data = self.fetch(&format!("{}/popular", product), BTreeMap::new())?;
        let items: Vec<Value> = list_items(&data).cloned().collect();
        self.cache.put(&key, &items, self.popular_ttl)?;

        let mut products = self.product_cache(product);
        for item in &items {
            if let Some(code) = item.get("code").and_then(Value::as_str) {
                products.insert(code.to_string(), Some(item.clone()));
            }
        }
        self.save_product_cache(product, &products)?;

        Ok(items)
    }

    /// Changelog of the branch the core build belongs to
    pub fn changelog(&self, core_build: Option<&str>) -> Result<Value> {
        let uri = match core_build.and_then(changelog_branch) {
            Some(branch) => format!("changelog/{}", branch),
            None => "changelog".to_string(),
        };

        let response = self
            .transport
            .get(&self.server_url(&uri))
            .map_err(|e| Error::remote_catalog(format!("{:#}", e)))?;

        if response.code == 404 {
            return Err(Error::remote_catalog(RESPONSE_EMPTY));
        }
        interpret(response)
    }

    /// Local path of a downloaded artifact
    pub fn file_path(&self, file_code: &str) -> PathBuf {
        let digest = Sha256::digest(file_code.as_bytes());
        self.temp_dir.join(format!("{:x}.arc", digest))
    }

    /// Download an artifact and verify its sha256 against `expected_hash`
    pub fn fetch_file(
        &self,
        uri: &str,
        file_code: &str,
        expected_hash: &str,
        params: BTreeMap<String, String>,
    ) -> Result<PathBuf> {
        let path = self.file_path(file_code);
        let (headers, form) = self.prepare(params)?;

        let code = self
            .transport
            .download(&self.server_url(uri), &headers, &form, &path)
            .map_err(|e| Error::remote_catalog(format!("{:#}", e)))?;

        if code != 200 {
            let body = fs::read_to_string(&path).unwrap_or_default();
            let _ = fs::remove_file(&path);
            return Err(Error::remote_catalog(if body.is_empty() {
                RESPONSE_EMPTY.to_string()
            } else {
                body
            }));
        }

        let actual = file_sha256(&path)?;
        if !actual.eq_ignore_ascii_case(expected_hash) {
            let _ = fs::remove_file(&path);
            return Err(Error::corrupt_download(path.display().to_string()));
        }

        info!("Downloaded {} ({})", file_code, uri);
        Ok(path)
    }

    pub fn download_plugin(&self, name: &str, hash: &str, installation: bool) -> Result<PathBuf> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), name.to_string());
        params.insert("installation".to_string(), if installation { "1" } else { "0" }.to_string());
        self.fetch_file("plugin/get", &format!("{}{}", name, hash), hash, params)
    }

    pub fn download_theme(&self, name: &str, hash: &str) -> Result<PathBuf> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), name.to_string());
        self.fetch_file("theme/get", &format!("{}{}", name, hash), hash, params)
    }

    /// Unpack a downloaded artifact into the given root
    pub fn extract(
        &self,
        name: &str,
        hash: &str,
        destination: &Path,
        archiver: &dyn ArchiveExtractor,
    ) -> Result<()> {
        let path = self.file_path(&format!("{}{}", name, hash));
        archiver.extract(&path, destination)
    }
}

fn list_items(value: &Value) -> impl Iterator<Item = &Value> {
    let items: Box<dyn Iterator<Item = &Value>> = match value {
        Value::Array(items) => Box::new(items.iter()),
        Value::Object(map) => Box::new(map.values()),
        _ => Box::new(std::iter::empty()),
    };
    items
}

/// `1.2.7` becomes `1.2`; single-segment builds have no branch
fn changelog_branch(build: &str) -> Option<String> {
    let (branch, _) = build.rsplit_once('.')?;
    Some(branch.to_string())
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_signature_known_value() {
        let signed = sign(
            &params(&[
                ("protocol_version", "1.1"),
                ("name", "Acme.Blog"),
                ("client", "plinth"),
                ("nonce", "1700000000123456"),
            ]),
            "cGxpbnRoLXNlY3JldA==",
        )
        .unwrap();
        assert_eq!(
            signed,
            "KVwX+g0VYGaNaQejxy88/0nQn1Womg6pjQ3NLjv9MX4BdvQ+EUBumiM9h5WODWHPeENY9ptmo2q5IoOLNlZFfw=="
        );
    }

    #[test]
    fn test_signature_encodes_values() {
        let signed = sign(
            &params(&[("query", "blog posts & more"), ("client", "plinth")]),
            "cGxpbnRoLXNlY3JldA==",
        )
        .unwrap();
        assert_eq!(
            signed,
            "tkNVVZfBxpIRomxw5uDt8BK+Dz/Vp2xAyYRNKVPVdh2CHQ6bGqqoTePeaY9MoDXrnaoqTGsp0YEDOCo2uFJwsg=="
        );
    }

    #[test]
    fn test_bad_secret() {
        assert!(matches!(
            sign(&BTreeMap::new(), "%%%"),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test_case(404, "", RESPONSE_NOT_FOUND ; "not found")]
    #[test_case(500, "", RESPONSE_EMPTY ; "empty error body")]
    #[test_case(503, "maintenance", "maintenance" ; "error body is the message")]
    #[test_case(200, "Package not found", "Package not found" ; "package not found is an error")]
    #[test_case(200, "<html>", RESPONSE_INVALID ; "not json")]
    #[test_case(200, "\"text\"", RESPONSE_INVALID ; "json scalar")]
    fn test_interpret_failures(code: u16, body: &str, message: &str) {
        let err = interpret(TransportResponse::new(code, body)).unwrap_err();
        assert_eq!(err.to_string(), format!("Remote catalog error: {}", message));
    }

    #[test]
    fn test_interpret_accepts_objects_and_lists() {
        assert!(interpret(TransportResponse::new(200, "{\"update\":1}")).is_ok());
        assert!(interpret(TransportResponse::new(200, "[]")).is_ok());
    }

    #[test]
    fn test_changelog_branch() {
        assert_eq!(changelog_branch("1.2.7").as_deref(), Some("1.2"));
        assert_eq!(changelog_branch("7"), None);
    }

    #[test]
    fn test_signed_request_headers() {
        let temp = TempDir::new().unwrap();
        let mut transport = MockTransport::new();
        transport
            .expect_post()
            .withf(|url, headers, form| {
                url == "https://catalog.test/api/plugin/detail"
                    && headers.iter().any(|(k, v)| k == "Rest-Key" && v == "key-1")
                    && headers.iter().any(|(k, _)| k == "Rest-Sign")
                    && form.iter().any(|(k, v)| k == "name" && v == "Acme.Blog")
                    && form.iter().any(|(k, _)| k == "nonce")
                    && form.iter().any(|(k, v)| k == "edge" && v == "1")
            })
            .returning(|_, _, _| Ok(TransportResponse::new(200, "{\"code\":\"Acme.Blog\"}")));

        let config = CatalogConfig {
            server_url: "https://catalog.test/api".into(),
            key: Some("key-1".into()),
            secret: Some("cGxpbnRoLXNlY3JldA==".into()),
            edge_updates: true,
            ..Default::default()
        };
        let client = CatalogClient::new(&config, Box::new(transport), temp.path());
        let detail = client.request(CatalogRequest::PluginDetail, "Acme.Blog").unwrap();
        assert_eq!(detail["code"], "Acme.Blog");
    }

    #[test]
    fn test_nonce_is_strictly_increasing() {
        let temp = TempDir::new().unwrap();
        let client = CatalogClient::new(&CatalogConfig::default(), Box::new(MockTransport::new()), temp.path());
        let first = client.next_nonce();
        let second = client.next_nonce();
        assert!(second > first);
    }
}
