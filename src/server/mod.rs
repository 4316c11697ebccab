//! HTTP server answering client and docker plugin requests on the
//! daemon's unix socket.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{format_err, Error};
use futures::future::{self, FutureExt};
use futures::stream::TryStreamExt;
use hyper::header::{self, HeaderMap};
use hyper::{Body, Method, Request, Response, StatusCode};
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tower_service::Service;
use url::form_urlencoded;

use proxmox_router::{http_err, HttpError};

use convoy_api_types::error_kind;
use convoy_buildcfg::{API_VERSION, CLIENT_USER_AGENT_TAG};

use crate::api::{ApiRequest, LockMode};
use crate::daemon::Daemon;

mod formatter;
use formatter::*;

pub mod router;
pub use router::{find_route, split_version, Route};

const MAX_REQUEST_BODY: usize = 64 * 1024;

/// Connection level service handing out an [ApiService] per client.
#[derive(Clone)]
pub struct RestServer {
    daemon: Arc<Daemon>,
}

impl RestServer {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Self { daemon }
    }
}

impl Service<&tokio::net::UnixStream> for RestServer {
    type Response = ApiService;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<ApiService, Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _ctx: &tokio::net::UnixStream) -> Self::Future {
        // unix socket peers have no address, use a fake one for the log
        let fake_peer = std::net::SocketAddr::from(([0, 0, 0, 0], 807));
        future::ok(ApiService {
            peer: fake_peer,
            daemon: Arc::clone(&self.daemon),
        })
        .boxed()
    }
}

pub struct ApiService {
    pub peer: std::net::SocketAddr,
    pub daemon: Arc<Daemon>,
}

fn log_response(
    peer: &std::net::SocketAddr,
    method: Method,
    path_query: &str,
    resp: &Response<Body>,
    user_agent: Option<String>,
) {
    let status = resp.status();
    if !(status.is_success() || status.is_informational()) {
        let reason = status.canonical_reason().unwrap_or("unknown reason");

        let message = match resp.extensions().get::<ErrorMessageExtension>() {
            Some(data) => &data.0,
            None => "request failed",
        };

        log::error!(
            "{} {}: {} {}: [client {}] {}",
            method.as_str(),
            path_query,
            status.as_str(),
            reason,
            peer,
            message
        );
        return;
    }

    if resp.extensions().get::<NoLogExtension>().is_some() {
        return;
    }
    log::debug!(
        "{} {}: {} [{}]",
        method.as_str(),
        path_query,
        status.as_str(),
        user_agent.unwrap_or_else(|| "-".to_string()),
    );
}

fn get_user_agent(headers: &HeaderMap) -> Option<String> {
    let agent = headers.get(header::USER_AGENT)?.to_str();
    agent
        .map(|s| {
            let mut s = s.to_owned();
            s.truncate(128);
            s
        })
        .ok()
}

/// Our own clients announce their API version, refuse mismatches.
fn check_client_version(user_agent: Option<&str>) -> Result<(), Error> {
    let agent = match user_agent {
        Some(agent) if agent.contains(&format!("{}/", CLIENT_USER_AGENT_TAG)) => agent,
        _ => return Ok(()),
    };
    let parts: Vec<&str> = agent.split('/').collect();
    if parts.len() == 2 && parts[1] != API_VERSION {
        return Err(http_err!(
            NOT_FOUND,
            "client version {} doesn't match with server {}",
            parts[1],
            API_VERSION
        ));
    }
    Ok(())
}

impl Service<Request<Body>> for ApiService {
    type Response = Response<Body>;
    type Error = Error;
    #[allow(clippy::type_complexity)]
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let path = match req.uri().path_and_query() {
            Some(pq) => pq.as_str().to_owned(),
            None => req.uri().path().to_owned(),
        };
        let method = req.method().clone();
        let user_agent = get_user_agent(req.headers());

        let daemon = Arc::clone(&self.daemon);
        let peer = self.peer;
        async move {
            let response = match handle_request(daemon, req, user_agent.as_deref()).await {
                Ok(response) => response,
                Err(err) => {
                    let (message, code) = match err.downcast_ref::<HttpError>() {
                        Some(apierr) => (apierr.message.clone(), apierr.code),
                        None => match error_kind(&err) {
                            Some(kind) => (err.to_string(), kind.http_status()),
                            None => (err.to_string(), StatusCode::BAD_REQUEST),
                        },
                    };
                    json_error_response(code, message)?
                }
            };
            log_response(&peer, method, &path, &response, user_agent);
            Ok(response)
        }
        .boxed()
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    match query {
        Some(query) => form_urlencoded::parse(query.as_bytes()).into_owned().collect(),
        None => HashMap::new(),
    }
}

async fn read_body(body: Body) -> Result<Vec<u8>, Error> {
    TryStreamExt::map_err(body, |err| {
        http_err!(BAD_REQUEST, "Problems reading request body: {}", err)
    })
    .try_fold(Vec::new(), |mut acc, chunk| async move {
        if acc.len() + chunk.len() <= MAX_REQUEST_BODY {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        } else {
            Err(http_err!(BAD_REQUEST, "Request body too large"))
        }
    })
    .await
}

async fn handle_request(
    daemon: Arc<Daemon>,
    req: Request<Body>,
    user_agent: Option<&str>,
) -> Result<Response<Body>, Error> {
    let (parts, body) = req.into_parts();
    let (version, path) = split_version(parts.uri.path());

    let route = match find_route(&parts.method, path, version.is_some()) {
        Some(route) => route,
        None => {
            return Err(http_err!(
                NOT_FOUND,
                "Handler not found: {} {}",
                parts.method,
                parts.uri
            ))
        }
    };

    if route.path != "/volumes/list" {
        log::debug!("calling {} {} for {}", route.method, route.path, parts.uri);
    }

    check_client_version(user_agent)?;

    let param = ApiRequest::new(read_body(body).await?, parse_query(parts.uri.query()));
    let result = run_handler(daemon, route, param).await?;

    let mut response = json_data_response(result, !route.versioned)?;
    if route.path == "/volumes/list" {
        response.extensions_mut().insert(NoLogExtension());
    }
    Ok(response)
}

/// Handlers touch the disk and run external tools, keep them off the
/// async workers.
async fn run_handler(
    daemon: Arc<Daemon>,
    route: &'static Route,
    param: ApiRequest,
) -> Result<serde_json::Value, Error> {
    tokio::task::spawn_blocking(move || {
        let handler = route.handler;
        match route.lock {
            LockMode::None => handler(&daemon, &param),
            LockMode::Read => {
                let _guard = daemon.read_lock();
                handler(&daemon, &param)
            }
            LockMode::Write => {
                let _guard = daemon.write_lock();
                handler(&daemon, &param)
            }
        }
    })
    .await
    .map_err(|err| format_err!("request handler failed - {}", err))?
}

/// Serve requests on `listener` until `shutdown` completes.
pub async fn serve<F>(daemon: Arc<Daemon>, listener: UnixListener, shutdown: F) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    let incoming = UnixListenerStream::new(listener);
    let rest_server = RestServer::new(daemon);

    hyper::Server::builder(hyper::server::accept::from_stream(incoming))
        .serve(rest_server)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
