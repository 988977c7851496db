use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const NS_MAIN: i32 = 0;

/// Maximum number of titles MediaWiki accepts in one `titles=` query.
pub const TITLES_PER_REQUEST: usize = 50;

/// Opaque `continue` parameters returned by a paginated query.
pub type Continuation = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerPage {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscludedPage {
    pub title: String,
    pub transcluded_in: Vec<String>,
    pub categories: Vec<String>,
}

/// One page of results from a paginated query.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub continuation: Option<Continuation>,
}

#[derive(Debug, Clone)]
pub struct CategoryMembersRequest {
    pub category: String,
    pub page_size: usize,
    pub start_sortkey_prefix: Option<String>,
}

/// Wiki operations the producer page run depends on.
pub trait ProducerWikiApi {
    /// One batch of category members, with their current wikitext.
    fn category_members(
        &mut self,
        request: &CategoryMembersRequest,
        continuation: Option<&Continuation>,
    ) -> Result<Batch<ProducerPage>>;
    fn page_content(&mut self, title: &str) -> Result<Option<ProducerPage>>;
    /// Render a DPL query and return the resulting HTML.
    fn expand_dynamic_list(&mut self, query: &str) -> Result<String>;
    /// Pages transcluding each of `titles` (redirects resolved), plus their
    /// membership of `category` when given.
    fn transclusions(
        &mut self,
        titles: &[String],
        category: Option<&str>,
        continuation: Option<&Continuation>,
    ) -> Result<Batch<TranscludedPage>>;
    fn save_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()>;
    fn request_count(&self) -> usize;
}

/// Walks a paginated query one batch at a time.
///
/// The next batch is only requested when the caller asks for it, so a run
/// finishes the pages it already holds before fetching more.
#[derive(Debug, Default)]
pub struct Paginator {
    continuation: Option<Continuation>,
    exhausted: bool,
}

impl Paginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_batch<T, F>(&mut self, fetch: F) -> Result<Option<Vec<T>>>
    where
        F: FnOnce(Option<&Continuation>) -> Result<Batch<T>>,
    {
        if self.exhausted {
            return Ok(None);
        }
        let batch = fetch(self.continuation.as_ref())?;
        self.exhausted = batch.continuation.is_none();
        self.continuation = batch.continuation;
        Ok(Some(batch.items))
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &crate::config::BotConfig) -> Self {
        Self {
            api_url: config.api_url_owned().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    /// Query sent as GET.
    Read,
    /// Query whose parameters may not fit in a URL.
    ReadPost,
    /// Login or edit: POST with write rate limits and retry budget.
    Write,
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
    logged_in: bool,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("WIKI_API_URL is not set (env or [wiki].api_url in config)");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
            logged_in: false,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.call(CallKind::Read, &[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.call(
            CallKind::Write,
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                self.logged_in = true;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    /// Send one API call, retrying transient failures with backoff.
    fn call(&mut self, kind: CallKind, params: &[(&str, String)]) -> Result<Value> {
        let url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = self.encode_params(params);
        let max_retries = match kind {
            CallKind::Write => self.config.max_write_retries,
            CallKind::Read | CallKind::ReadPost => self.config.max_retries,
        };

        let mut attempt = 0;
        loop {
            self.throttle(kind);
            let request = match kind {
                CallKind::Read => self.client.get(url.clone()).query(&pairs),
                CallKind::ReadPost | CallKind::Write => self.client.post(url.clone()).form(&pairs),
            };
            let outcome = request
                .header("User-Agent", self.config.user_agent.as_str())
                .send();

            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status()),
                Err(error) => is_retryable_error(error),
            };
            if retryable && attempt < max_retries {
                debug!(attempt, ?kind, "retrying MediaWiki API call");
                self.backoff(kind, attempt);
                attempt += 1;
                continue;
            }

            let response = outcome.context("failed to call MediaWiki API")?;
            let status = response.status();
            if !status.is_success() {
                bail!("MediaWiki API request failed with HTTP {status}");
            }
            let payload: Value = response
                .json()
                .context("failed to decode MediaWiki API JSON response")?;
            return check_api_error(payload);
        }
    }

    fn encode_params(&self, params: &[(&str, String)]) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(params.len() + 3);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        if self.logged_in {
            pairs.push(("assert".to_string(), "bot".to_string()));
        }
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }
        pairs
    }

    /// Keep consecutive calls at least the configured interval apart.
    fn throttle(&mut self, kind: CallKind) {
        let interval = Duration::from_millis(match kind {
            CallKind::Write => self.config.rate_limit_write_ms,
            CallKind::Read | CallKind::ReadPost => self.config.rate_limit_read_ms,
        });
        if let Some(elapsed) = self.last_request_at.map(|last| last.elapsed()) {
            if elapsed < interval {
                sleep(interval - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn backoff(&self, kind: CallKind, attempt: usize) {
        let factor = 2u64.saturating_pow(u32::try_from(attempt).unwrap_or(16));
        let mut delay = self.config.retry_delay_ms.saturating_mul(factor);
        if kind == CallKind::Write {
            delay = delay.saturating_mul(2);
        }
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|now| u64::from(now.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(delay.saturating_add(jitter)));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.call(CallKind::Read, &[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl ProducerWikiApi for MediaWikiClient {
    fn category_members(
        &mut self,
        request: &CategoryMembersRequest,
        continuation: Option<&Continuation>,
    ) -> Result<Batch<ProducerPage>> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("generator", "categorymembers".to_string()),
            ("gcmtitle", request.category.clone()),
            ("gcmnamespace", NS_MAIN.to_string()),
            ("gcmprop", "ids|title|sortkeyprefix".to_string()),
            ("gcmlimit", request.page_size.to_string()),
            ("gcmsort", "sortkey".to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ];
        if let Some(prefix) = &request.start_sortkey_prefix {
            params.push(("gcmstartsortkeyprefix", prefix.clone()));
        }
        push_continuation(&mut params, continuation);

        debug!(category = %request.category, "fetching category members batch");
        let response = self.call(CallKind::Read, &params)?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode categorymembers API response")?;

        let items = parsed
            .query
            .pages
            .into_iter()
            .filter_map(PageQueryItem::into_producer_page)
            .collect();
        Ok(Batch {
            items,
            continuation: parsed.continuation.map(continuation_from_payload),
        })
    }

    fn page_content(&mut self, title: &str) -> Result<Option<ProducerPage>> {
        let params = vec![
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ];
        let response = self.call(CallKind::Read, &params)?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page content API response")?;
        Ok(parsed
            .query
            .pages
            .into_iter()
            .find_map(PageQueryItem::into_producer_page))
    }

    fn expand_dynamic_list(&mut self, query: &str) -> Result<String> {
        debug!(query, "expanding dynamic list query");
        let response = self.call(
            CallKind::ReadPost,
            &[
                ("action", "parse".to_string()),
                ("text", query.to_string()),
                ("contentmodel", "wikitext".to_string()),
                ("prop", "text".to_string()),
                ("disablelimitreport", "1".to_string()),
            ],
        )?;
        let parsed: ParseResponse =
            serde_json::from_value(response).context("failed to decode parse API response")?;
        parsed
            .parse
            .and_then(|payload| payload.text)
            .ok_or_else(|| anyhow::anyhow!("missing parse text in API response"))
    }

    fn transclusions(
        &mut self,
        titles: &[String],
        category: Option<&str>,
        continuation: Option<&Continuation>,
    ) -> Result<Batch<TranscludedPage>> {
        let prop = if category.is_some() {
            "transcludedin|categories"
        } else {
            "transcludedin"
        };
        let mut params = vec![
            ("action", "query".to_string()),
            ("prop", prop.to_string()),
            ("titles", titles.join("|")),
            ("redirects", "1".to_string()),
            ("tinamespace", NS_MAIN.to_string()),
            ("tilimit", "max".to_string()),
        ];
        if let Some(category) = category {
            params.push(("clcategories", category.to_string()));
            params.push(("cllimit", "max".to_string()));
        }
        push_continuation(&mut params, continuation);

        let response = self.call(CallKind::ReadPost, &params)?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode transcludedin API response")?;
        let items = parsed
            .query
            .pages
            .into_iter()
            .map(|page| TranscludedPage {
                title: page.title,
                transcluded_in: page.transcludedin.into_iter().map(|item| item.title).collect(),
                categories: page.categories.into_iter().map(|item| item.title).collect(),
            })
            .collect();
        Ok(Batch {
            items,
            continuation: parsed.continuation.map(continuation_from_payload),
        })
    }

    fn save_page(&mut self, title: &str, content: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let response = self.call(
            CallKind::Write,
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", content.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
        )?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn push_continuation<'a>(
    params: &mut Vec<(&'a str, String)>,
    continuation: Option<&'a Continuation>,
) {
    if let Some(continuation) = continuation {
        for (key, value) in continuation {
            params.push((key.as_str(), value.clone()));
        }
    }
}

fn continuation_from_payload(payload: BTreeMap<String, Value>) -> Continuation {
    payload
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

fn env_value<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    transcludedin: Vec<TitleQueryItem>,
    #[serde(default)]
    categories: Vec<TitleQueryItem>,
}

impl PageQueryItem {
    fn into_producer_page(self) -> Option<ProducerPage> {
        if self.missing {
            return None;
        }
        let content = self
            .revisions
            .into_iter()
            .next()?
            .slots?
            .main?
            .content;
        Some(ProducerPage {
            title: self.title,
            content,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ParseResponse {
    parse: Option<ParsePayload>,
}

#[derive(Debug, Deserialize, Default)]
struct ParsePayload {
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
