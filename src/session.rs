use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, info};
use zeroize::Zeroizing;

use crate::error::{Result, SyncError};
use crate::transport::{ensure_success, HttpResponse, Request, Transport};

pub const AUTH_PATH: &str = "/auth/";
pub const PAYOUT_PATH: &str = "/sale/payout.php";
pub const APP_LIST_PATH: &str = "/app/";
pub const CLIENT_LIST_PATH: &str = "/sale/clients.php";
pub const FILTER_PATH: &str = "/bitrix/services/main/ajax.php";

pub const PAYOUT_AJAX_ID: &str = "08121894e876869a8373dc61fb5e7f3e";
pub const APP_LIST_AJAX_ID: &str = "2eac8fa73aa98e2f7e412d509f9fe12b";

pub const CSRF_HEADER: &str = "X-Bitrix-Csrf-Token";

/// Where the vendor portal lives.
#[derive(Debug, Clone)]
pub struct Portal {
    pub base_url: String,
}

impl Portal {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub struct Credentials {
    pub login: String,
    pub password: Zeroizing<String>,
}

/// Authenticated portal context: the transport's cookie jar plus the CSRF token.
/// Written once by [`authenticate`] and only read afterwards.
pub struct Session<T: Transport> {
    transport: T,
    portal: Portal,
    token: String,
}

impl<T: Transport> Session<T> {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn portal(&self) -> &Portal {
        &self.portal
    }

    /// Send with the CSRF header attached. Non-2xx answers are transport errors.
    pub fn send(&self, request: Request) -> Result<HttpResponse> {
        let request = request.header(CSRF_HEADER, self.token.as_str());
        let response = self.transport.send(&request)?;
        ensure_success(&request, response)
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""bitrix_sessid":"([a-f0-9]+)""#).expect("valid token pattern"))
}

pub fn extract_token(body: &str) -> Option<String> {
    token_pattern()
        .captures(body)
        .map(|caps| caps[1].to_string())
}

pub fn authenticate<T: Transport>(
    transport: T,
    portal: Portal,
    credentials: &Credentials,
) -> Result<Session<T>> {
    let request = Request::post(portal.url(AUTH_PATH))
        .form("AUTH_FORM", "Y")
        .form("TYPE", "AUTH")
        .form("USER_LOGIN", credentials.login.as_str())
        .form("USER_PASSWORD", credentials.password.as_str());

    let response = transport
        .send(&request)
        .and_then(|resp| ensure_success(&request, resp))
        .map_err(|e| {
            error!("Authentication failed: {e}");
            e
        })?;

    let token = extract_token(&response.body)
        .ok_or_else(|| SyncError::Protocol("expected token not found".to_string()))?;
    info!(login = %credentials.login, "authenticated with the vendor portal");

    Ok(Session {
        transport,
        portal,
        token,
    })
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::transport::fake::FakeTransport;

    pub const TOKEN: &str = "0123abcdef";

    /// A session over a scripted transport, already past login.
    pub fn session_with(
        handler: impl Fn(&Request) -> Result<HttpResponse> + 'static,
    ) -> Session<FakeTransport> {
        Session {
            transport: FakeTransport::new(handler),
            portal: Portal::new("https://vendors.test"),
            token: TOKEN.to_string(),
        }
    }
}
