use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Result, SyncError};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.212 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "ru,en-US";
const SITE_ID: &str = "mv";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    Get,
    Post,
}

/// A portal request. Query, form and header pairs keep insertion order.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url.into())
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url.into())
    }

    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn form(mut self, key: &str, value: impl Into<String>) -> Self {
        self.form.push((key.to_string(), value.into()));
        self
    }

    pub fn form_pairs(mut self, pairs: Vec<(String, String)>) -> Self {
        self.form.extend(pairs);
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    #[cfg(test)]
    pub fn query_value(&self, key: &str) -> Option<&str> {
        lookup(&self.query, key)
    }

    #[cfg(test)]
    pub fn form_value(&self, key: &str) -> Option<&str> {
        lookup(&self.form, key)
    }

    #[cfg(test)]
    pub fn header_value(&self, key: &str) -> Option<&str> {
        lookup(&self.headers, key)
    }
}

#[cfg(test)]
fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking request/response seam between the portal client and the network.
pub trait Transport {
    fn send(&self, request: &Request) -> Result<HttpResponse>;
}

/// Turn a non-2xx answer into a transport failure.
pub fn ensure_success(request: &Request, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(SyncError::Transport(format!(
            "HTTP {} from {}",
            response.status, request.url
        )))
    }
}

/// `reqwest` transport with a cookie jar that lives as long as the client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("accept-language"),
            HeaderValue::from_static(ACCEPT_LANGUAGE),
        );
        headers.insert(
            HeaderName::from_static("x-bitrix-site-id"),
            HeaderValue::from_static(SITE_ID),
        );
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true);
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.form),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        tracing::debug!(url = %request.url, status, bytes = body.len(), "portal response");
        Ok(HttpResponse { status, body })
    }
}
