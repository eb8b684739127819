// limitwatch/src/fetch/http.rs
//
// reqwest-backed LogSource for a Better Stack style query endpoint:
//   GET {endpoint}?source_ids=..&batch=..&from=..&to=..&query=..
//   GET {pagination.next}
// Every call carries `Authorization: Bearer <token>`.

use std::future::Future;
use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::Client;

use super::{LogSource, PageRequest};
use crate::error::FetchError;

pub struct HttpLogSource {
    client:     Client,
    endpoint:   String,
    source_ids: String,
    token:      String,
}

impl HttpLogSource {
    pub fn new(
        endpoint:   impl Into<String>,
        source_ids: impl Into<String>,
        token:      impl Into<String>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("limitwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint:   endpoint.into(),
            source_ids: source_ids.into(),
            token:      token.into(),
        })
    }

    fn build(&self, request: &PageRequest) -> reqwest::RequestBuilder {
        let builder = match request {
            PageRequest::Query { filter, batch, range } => self.client.get(&self.endpoint).query(&[
                ("source_ids", self.source_ids.clone()),
                ("batch",      batch.to_string()),
                ("from",       range.from.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ("to",         range.to.to_rfc3339_opts(SecondsFormat::Millis, true)),
                ("query",      filter.clone()),
            ]),
            PageRequest::Cursor(url) => self.client.get(url),
        };
        builder.bearer_auth(&self.token)
    }
}

impl LogSource for HttpLogSource {
    fn send(&self, request: &PageRequest) -> impl Future<Output = Result<String, FetchError>> + Send {
        let builder = self.build(request);
        async move {
            let response = builder.send().await?;
            let status   = response.status();
            let body     = response.text().await?;
            if !status.is_success() {
                return Err(FetchError::Status { status: status.as_u16(), body });
            }
            Ok(body)
        }
    }
}
