//! Interactive [`AuthorizationCodeProvider`]s.

use crate::auth::{AuthorizationCodeProvider, AuthorizationPrompt};
use crate::credential::Platform;
use crate::error::AuthError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body};
use oauth2::{AuthorizationCode, CsrfToken};
use reqwest::Url;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;

const DEFAULT_COMPLETION_PAGE: &str = "<!doctype html>\
<html><head><title>Authorized</title></head>\
<body><p>Authorization complete. You can close this tab and return to the terminal.</p></body></html>";

/// What came back in a redirect query.
#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    Code(String),
    Declined(String),
    NotARedirect,
}

fn parse_redirect_query(query: &str, expected_state: &CsrfToken) -> Result<Redirect, String> {
    let mut state = None;
    let mut code = None;
    let mut error = None;
    let mut error_description = None;
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        match &*k {
            "state" => state = Some(v),
            "code" => code = Some(v),
            "error" => error = Some(v),
            "error_description" => error_description = Some(v),
            _ => {}
        }
    }

    if state.is_none() && code.is_none() && error.is_none() {
        return Ok(Redirect::NotARedirect);
    }
    if state.as_deref() != Some(expected_state.secret().as_str()) {
        return Err("redirect state does not match this authorization attempt".to_string());
    }
    if let Some(error) = error {
        let reason = error_description.unwrap_or_else(|| error.clone());
        return Ok(Redirect::Declined(reason.into_owned()));
    }
    match code {
        Some(code) if !code.is_empty() => Ok(Redirect::Code(code.into_owned())),
        _ => Err("redirect carries no authorization code".to_string()),
    }
}

/// Interprets what the operator pasted: either the bare code or the whole redirect URL.
fn parse_pasted(
    input: &str,
    prompt: &AuthorizationPrompt<'_>,
) -> Result<Option<AuthorizationCode>, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }

    let query = match Url::parse(input) {
        Ok(url) => url.query().map(str::to_string),
        Err(_) if input.contains("code=") => Some(
            input
                .split_once('?')
                .map_or(input, |(_, query)| query)
                .to_string(),
        ),
        Err(_) => None,
    };
    let Some(query) = query else {
        return Ok(Some(AuthorizationCode::new(input.to_string())));
    };

    match parse_redirect_query(&query, prompt.state).map_err(|m| prompt.denied(m))? {
        Redirect::Code(code) => Ok(Some(AuthorizationCode::new(code))),
        Redirect::Declined(reason) => Err(prompt.denied(reason)),
        Redirect::NotARedirect => Err(prompt.denied("pasted URL carries no authorization code")),
    }
}

/// Prints the authorization URL and reads the code from standard input.
///
/// Works with any redirect target, including a static page that just displays the code.
#[derive(Debug, Clone)]
pub struct ConsolePrompt {
    open_browser: bool,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self { open_browser: true }
    }

    /// Only print the URL.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }
}

impl Default for ConsolePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationCodeProvider for ConsolePrompt {
    async fn authorization_code(
        &self,
        prompt: AuthorizationPrompt<'_>,
    ) -> Result<Option<AuthorizationCode>, AuthError> {
        eprintln!(
            "\nAuthorize {} access by opening this URL in a browser:\n\n  {}\n",
            prompt.platform, prompt.url
        );
        if self.open_browser {
            if let Err(e) = webbrowser::open(prompt.url.as_str()) {
                tracing::debug!(error = %e, "could not open browser");
            }
        }
        eprint!("Paste the authorization code or the full redirect URL: ");

        let mut line = String::new();
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        stdin
            .read_line(&mut line)
            .await
            .map_err(|e| prompt.denied(format!("read authorization code: {e}")))?;
        parse_pasted(&line, &prompt)
    }
}

/// Receives the redirect itself on a loopback port.
///
/// The port is picked when the redirect URL is requested, so the OAuth application must allow
/// arbitrary loopback ports (Google "installed app" clients do).
#[derive(Debug)]
pub struct LoopbackRedirect {
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    open_browser: bool,
    completion_page: &'static str,
}

impl LoopbackRedirect {
    pub fn new() -> Self {
        Self {
            listener: tokio::sync::Mutex::new(None),
            open_browser: true,
            completion_page: DEFAULT_COMPLETION_PAGE,
        }
    }

    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// HTML shown in the browser once the code has been received.
    pub fn with_completion_page(mut self, html: &'static str) -> Self {
        self.completion_page = html;
        self
    }
}

impl Default for LoopbackRedirect {
    fn default() -> Self {
        Self::new()
    }
}

type RedirectOutcome = Result<Option<AuthorizationCode>, String>;

impl AuthorizationCodeProvider for LoopbackRedirect {
    async fn redirect_url(&self, platform: Platform) -> Result<Option<String>, AuthError> {
        let transient = |message| AuthError::Transient { platform, message };
        let socket = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| transient(format!("bind to localhost: {e}")))?;
        let addr = socket
            .local_addr()
            .map_err(|e| transient(format!("get local address: {e}")))?;
        *self.listener.lock().await = Some(socket);
        Ok(Some(format!("http://{}:{}", addr.ip(), addr.port())))
    }

    async fn authorization_code(
        &self,
        prompt: AuthorizationPrompt<'_>,
    ) -> Result<Option<AuthorizationCode>, AuthError> {
        let Some(socket) = self.listener.lock().await.take() else {
            return Err(prompt.denied("no redirect listener is bound for this attempt"));
        };

        tracing::info!(url = %prompt.url, "asking user to follow OAuth flow");
        eprintln!(
            "\nAuthorize {} access in your browser. If it does not open, visit:\n\n  {}\n",
            prompt.platform, prompt.url
        );
        if self.open_browser {
            if let Err(e) = webbrowser::open(prompt.url.as_str()) {
                tracing::debug!(error = %e, "could not open browser");
            }
        }

        let expected_state = prompt.state.clone();
        let platform = prompt.platform;
        let completion_page = self.completion_page;
        let (got, mut gotten) = tokio::sync::mpsc::channel::<RedirectOutcome>(1);

        let outcome = loop {
            tokio::select! {
                accepted = socket.accept() => {
                    let (conn, _) = accepted
                        .map_err(|e| AuthError::Transient { platform, message: format!("accept redirect: {e}") })?;
                    let conn = hyper_util::rt::TokioIo::new(conn);
                    let got = got.clone();
                    let expected_state = expected_state.clone();
                    let service = service_fn(move |req: Request<body::Incoming>| {
                        let got = got.clone();
                        let expected_state = expected_state.clone();
                        async move {
                            let query = req.uri().query().unwrap_or("");
                            let (status, page, outcome) = match parse_redirect_query(query, &expected_state) {
                                Ok(Redirect::NotARedirect) => (StatusCode::NOT_FOUND, "not found", None),
                                Ok(Redirect::Code(code)) => (
                                    StatusCode::OK,
                                    completion_page,
                                    Some(Ok(Some(AuthorizationCode::new(code)))),
                                ),
                                Ok(Redirect::Declined(reason)) => {
                                    tracing::warn!(%reason, "authorization declined in browser");
                                    (StatusCode::OK, "Authorization was declined.", Some(Ok(None)))
                                }
                                Err(message) => (StatusCode::BAD_REQUEST, "invalid authorization redirect", Some(Err(message))),
                            };
                            if let Some(outcome) = outcome {
                                // only the first redirect counts; later sends find the channel full or closed
                                let _ = got.try_send(outcome);
                            }
                            let mut response = Response::new(Full::<Bytes>::from(page));
                            *response.status_mut() = status;
                            Ok::<_, std::convert::Infallible>(response)
                        }
                    });
                    tokio::spawn(async move {
                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(conn, service)
                            .await
                        {
                            tracing::debug!(error = %e, "redirect connection ended with error");
                        }
                    });
                }
                outcome = gotten.recv() => {
                    break outcome;
                }
            }
        };

        match outcome {
            Some(Ok(code)) => Ok(code),
            Some(Err(message)) => Err(AuthError::Denied { platform, message }),
            None => Err(AuthError::Denied {
                platform,
                message: "redirect listener stopped before receiving a code".to_string(),
            }),
        }
    }
}
