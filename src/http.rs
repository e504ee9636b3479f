//! Polling HTTP client: requests a resource, maps the JSON body into the
//! shared store and optionally repeats on an interval.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::common::config::SyncConfig;
use crate::common::error::{Result, SyncError};
use crate::common::util::with_cache_buster;
use crate::mapper::{MapContext, Mapped, Mapper, SharedContext};
use crate::store::{RecordStore, SharedStore};

pub use poll::{parse_interval, CancelToken, PollHandle};

pub mod poll;

pub const METHOD_OVERRIDE_HEADER: &str = "X-Http-Method-Override";

pub type OnComplete = Arc<dyn Fn() + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;
/// Decides from the store whether a poll should fire again.
pub type KeepPolling = Arc<dyn Fn(&RecordStore) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Send the request as a POST carrying `params` in the body.
    pub get_as_post: bool,
    pub params: Option<String>,
    /// Runs after a successful response has been mapped.
    pub on_complete: Option<OnComplete>,
}

impl RequestOptions {
    pub fn get_as_post(params: &str) -> RequestOptions {
        RequestOptions {
            get_as_post: true,
            params: Some(params.to_string()),
            on_complete: None,
        }
    }

    pub fn on_complete(mut self, callback: impl Fn() + Send + Sync + 'static) -> RequestOptions {
        self.on_complete = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("get_as_post", &self.get_as_post)
            .field("params", &self.params)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Logs a failed request. A JSON error body is logged as-is; otherwise the
/// status text is logged, except in test mode.
pub fn default_error_handler(test_mode: bool) -> ErrorHandler {
    Arc::new(move |err: &SyncError| match err {
        SyncError::Status {
            status,
            status_text,
            url,
            body,
        } => match serde_json::from_str::<Value>(body) {
            Ok(json) => error!("HttpClient: {} answered {}: {}", url, status, json),
            Err(_) if !test_mode => error!("HttpClient: {} answered {} {}", url, status, status_text),
            Err(_) => debug!("HttpClient: {} answered {}", url, status),
        },
        other => error!("HttpClient: {}", other),
    })
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    api_prefix: String,
    credentials: Option<(String, String)>,
    test_mode: bool,
    store: SharedStore,
    context: SharedContext,
    sequence: Arc<AtomicU64>,
}

impl HttpClient {
    pub fn new(config: &SyncConfig, store: SharedStore, context: SharedContext) -> Result<HttpClient> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.polling.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(HttpClient {
            client,
            base_url: config.ambari.url.trim_end_matches('/').to_string(),
            api_prefix: config.ambari.api_prefix.clone(),
            credentials: Some(config.credentials()?),
            test_mode: config.test_mode,
            store,
            context,
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Requests go out without an Authorization header.
    pub fn without_auth(mut self) -> HttpClient {
        self.credentials = None;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// `<api_prefix>/clusters/<cluster name><path>`.
    pub async fn cluster_url(&self, path: &str) -> Result<String> {
        let ctx = self.context.read().await;
        match &ctx.cluster_name {
            Some(name) => Ok(format!("{}/clusters/{}{}", self.api_prefix, name, path)),
            None => Err(SyncError::MissingData("cluster name is not loaded yet".to_string())),
        }
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder, accept: fn(StatusCode) -> bool) -> Result<String> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !accept(status) {
            return Err(SyncError::Status {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                url: url.to_string(),
                body,
            });
        }
        Ok(body)
    }

    /// Performs one request and returns the parsed body. Only HTTP 200 counts
    /// as success.
    pub async fn request(&self, url: &str, options: &RequestOptions) -> Result<Value> {
        let target = with_cache_buster(&self.absolute(url), Utc::now().timestamp_millis());
        let request = if options.get_as_post && !self.test_mode {
            let body = json!({"RequestInfo": {"query": options.params}});
            self.client
                .post(&target)
                .header(METHOD_OVERRIDE_HEADER, "GET")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body.to_string())
        } else {
            self.client.get(&target)
        };

        let body = self.send(url, request, |status| status == StatusCode::OK).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Typed read of a payload that has no mapper.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let payload = self.request(url, &RequestOptions::default()).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// One request mapped into the store. A response that arrives after a
    /// newer one for the same url and mapper is mapped but not committed.
    pub async fn fetch(&self, url: &str, mapper: &dyn Mapper, options: &RequestOptions) -> Result<Mapped> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = self.request(url, options).await?;

        let ctx: MapContext = self.context.read().await.clone();
        let mapped = {
            let mut store = self.store.write().await;
            let resource = format!("{}#{}", url, mapper.name());
            let admitted = store.admit(&resource, sequence);
            if !admitted {
                debug!("Discarding stale response #{} for {}", sequence, resource);
            }
            mapper.apply(&payload, &ctx, &mut store, !admitted)?
        };

        if let Some(on_complete) = &options.on_complete {
            on_complete();
        }
        Ok(mapped)
    }

    /// Requests `url` and maps each 200 response with `mapper`. Failures go to
    /// `error_handler` (the logging default when `None`). With an `interval`
    /// the request repeats after each completion until the handle is
    /// cancelled.
    pub fn get(
        &self,
        url: &str,
        mapper: Arc<dyn Mapper>,
        options: RequestOptions,
        error_handler: Option<ErrorHandler>,
        interval: Option<Duration>,
    ) -> PollHandle {
        self.spawn_poll(url, mapper, options, error_handler, interval, None)
    }

    /// Like `get`, but checks `keep_polling` against the store before every
    /// request and ends the poll once it returns false.
    pub fn get_while(
        &self,
        url: &str,
        mapper: Arc<dyn Mapper>,
        options: RequestOptions,
        interval: Duration,
        keep_polling: KeepPolling,
    ) -> PollHandle {
        self.spawn_poll(url, mapper, options, None, Some(interval), Some(keep_polling))
    }

    fn spawn_poll(
        &self,
        url: &str,
        mapper: Arc<dyn Mapper>,
        options: RequestOptions,
        error_handler: Option<ErrorHandler>,
        interval: Option<Duration>,
        keep_polling: Option<KeepPolling>,
    ) -> PollHandle {
        let client = self.clone();
        let url = url.to_string();
        let handler = error_handler.unwrap_or_else(|| default_error_handler(self.test_mode));

        PollHandle::spawn(move |cancel| async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                if let Some(keep_polling) = &keep_polling {
                    if !keep_polling(&*client.store.read().await) {
                        break;
                    }
                }
                if let Err(err) = client.fetch(&url, mapper.as_ref(), &options).await {
                    handler(&err);
                }
                match interval {
                    Some(interval) => {
                        if cancel.sleep(interval).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            debug!("Stopped polling {}", url);
        })
    }

    pub fn post(
        &self,
        url: &str,
        mapper: Arc<dyn Mapper>,
        options: RequestOptions,
        error_handler: Option<ErrorHandler>,
        interval: Option<Duration>,
    ) -> PollHandle {
        self.get(url, mapper, options, error_handler, interval)
    }

    pub async fn put_json(&self, url: &str, body: &Value) -> Result<()> {
        let request = self.client.put(self.absolute(url)).body(body.to_string());
        let response = self.send(url, request, |status| status.is_success()).await?;
        debug!("PUT {} answered {}", url, response);
        Ok(())
    }
}
