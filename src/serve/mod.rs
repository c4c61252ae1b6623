//! HTTP server for a conductor application.
//!
//! Serves HTTP/1 with hyper on the tokio runtime. Each request runs as one
//! task: static files from `public/` first, then the route table, then the
//! render pipeline.

pub mod request;
pub mod static_files;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::context::ResponseParts;
use crate::error::{Error, Result};
use crate::template::renderer::html_escape;
use request::{parse_body, parse_query_string};
use static_files::{generate_etag, get_mime_type, STATIC_CACHE_MAX_AGE};

/// Accept connections until Ctrl-C.
pub async fn serve(app: Arc<App>) -> Result<()> {
    let addr = format!("{}:{}", app.settings().host, app.settings().port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Server(format!("failed to bind {}: {}", addr, e)))?;
    info!(
        address = %addr,
        dev_mode = app.settings().dev_mode,
        "server listening"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let app = app.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let app = app.clone();
                        async move { Ok::<_, Infallible>(handle(&app, req).await) }
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(peer = %peer, error = %e, "connection closed with error");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handle one hyper request.
pub async fn handle(app: &App, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return text_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    handle_request(app, parts.method, path_and_query, parts.headers, body).await
}

/// Handle a request whose body has already been read.
pub async fn handle_request(
    app: &App,
    method: Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let started = Instant::now();
    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));

    let response = match serve_static(app, &method, path, &headers).await {
        Some(response) => response,
        None => {
            let mut ctx = app.context(method.clone(), path);
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            ctx.query = parse_query_string(query);
            ctx.body = parse_body(content_type.as_deref(), &String::from_utf8_lossy(&body));
            ctx.headers = headers;

            match app.dispatch(&mut ctx).await {
                Ok(true) => into_response(ctx.response),
                Ok(false) => not_found(&method, path),
                Err(e) => {
                    error!(method = %method, path = %path, error = %e, "request failed");
                    server_error(app.settings().dev_mode, &e)
                }
            }
        }
    };

    if app.settings().request_log {
        info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "request"
        );
    }
    response
}

/// Serve a file from the public directory for GET/HEAD requests.
async fn serve_static(
    app: &App,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
) -> Option<Response<Full<Bytes>>> {
    if method != Method::GET && method != Method::HEAD {
        return None;
    }
    let file_path = static_files::resolve(&app.settings().public_path(), path)?;

    let mut extra = HeaderMap::new();
    if !app.settings().dev_mode {
        let modified = tokio::fs::metadata(&file_path)
            .await
            .and_then(|m| m.modified())
            .ok();
        if let Some(etag) = modified.map(generate_etag) {
            let client_etag = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
            let cached = client_etag.is_some_and(|c| c == etag || c == format!("W/{}", etag));
            if let Ok(value) = HeaderValue::from_str(&etag) {
                extra.insert(ETAG, value);
            }
            extra.insert(CACHE_CONTROL, HeaderValue::from_static(STATIC_CACHE_MAX_AGE));
            if cached {
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = StatusCode::NOT_MODIFIED;
                *response.headers_mut() = extra;
                return Some(response);
            }
        }
    }

    let content = match tokio::fs::read(&file_path).await {
        Ok(content) => content,
        Err(e) => {
            error!(file = %file_path.display(), error = %e, "failed to read static file");
            return Some(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error reading file",
            ));
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(content)));
    extra.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(get_mime_type(&file_path)),
    );
    *response.headers_mut() = extra;
    Some(response)
}

fn into_response(parts: ResponseParts) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(parts.body.unwrap_or_default())));
    *response.status_mut() = parts.status;
    *response.headers_mut() = parts.headers;
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn html_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    response
}

fn not_found(method: &Method, path: &str) -> Response<Full<Bytes>> {
    html_response(
        StatusCode::NOT_FOUND,
        format!(
            "<!DOCTYPE html><html><head><title>404 Not Found</title></head>\
             <body><h1>404 Not Found</h1><p>No route for {} {}</p></body></html>",
            method,
            html_escape(path)
        ),
    )
}

fn server_error(dev_mode: bool, err: &Error) -> Response<Full<Bytes>> {
    let detail = if dev_mode {
        format!("<pre>{}</pre>", html_escape(&err.to_string()))
    } else {
        "<p>Something went wrong.</p>".to_string()
    };
    html_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!(
            "<!DOCTYPE html><html><head><title>500 Internal Server Error</title></head>\
             <body><h1>500 Internal Server Error</h1>{}</body></html>",
            detail
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::context::Context;
    use crate::controller::{ActionFuture, Controller, ControllerRegistry};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::path::Path;

    fn greet(ctx: &mut Context) -> ActionFuture<'_> {
        Box::pin(async move {
            let name = ctx.param_str("name").unwrap_or("nobody").to_string();
            ctx.render(json!({"name": name}), None);
            Ok(())
        })
    }

    fn fail(_ctx: &mut Context) -> ActionFuture<'_> {
        Box::pin(async { Err(Error::action("<db down>")) })
    }

    fn app(dir: &Path, dev_mode: bool) -> App {
        let views = dir.join("views");
        std::fs::create_dir_all(views.join("hello")).unwrap();
        std::fs::create_dir_all(views.join("layout")).unwrap();
        std::fs::create_dir_all(dir.join("public")).unwrap();
        std::fs::write(views.join("hello/index.html"), "Hello <%= name %>").unwrap();
        std::fs::write(views.join("layout/index.html"), "[<%= yield %>]").unwrap();
        std::fs::write(dir.join("public/site.css"), "body{}").unwrap();

        let registry = ControllerRegistry::from_controllers([Controller::new("hello")
            .action("index", "(ctx)", greet)
            .action("fail", "(ctx)", fail)])
        .unwrap();
        let settings = Settings {
            app_dir: dir.to_path_buf(),
            dev_mode,
            request_log: false,
            ..Settings::default()
        };
        App::new(settings, registry).unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_routes_with_query_and_form() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), false);

        let response =
            handle_request(&app, Method::GET, "/hello?name=Ann+Lee", HeaderMap::new(), Bytes::new())
                .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(body_string(response).await, "[Hello Ann Lee]");

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let response = handle_request(
            &app,
            Method::POST,
            "/hello/?name=query",
            headers,
            Bytes::from_static(b"name=form"),
        )
        .await;
        assert_eq!(body_string(response).await, "[Hello form]");
    }

    #[tokio::test]
    async fn test_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), false);
        let response =
            handle_request(&app, Method::GET, "/nope", HeaderMap::new(), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_string(response).await.contains("No route for GET /nope"));
    }

    #[tokio::test]
    async fn test_error_page_detail_depends_on_mode() {
        let dir = tempfile::tempdir().unwrap();

        let prod = app(dir.path(), false);
        let response =
            handle_request(&prod, Method::GET, "/hello/fail", HeaderMap::new(), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert!(body.contains("Something went wrong"));
        assert!(!body.contains("db down"));

        let dev = app(dir.path(), true);
        let response =
            handle_request(&dev, Method::GET, "/hello/fail", HeaderMap::new(), Bytes::new()).await;
        assert!(body_string(response)
            .await
            .contains("Action failed: &lt;db down&gt;"));
    }

    #[tokio::test]
    async fn test_static_files_and_etag() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), false);

        let response =
            handle_request(&app, Method::GET, "/site.css", HeaderMap::new(), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/css");
        let etag = response.headers()[ETAG].clone();
        assert_eq!(body_string(response).await, "body{}");

        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, etag);
        let response =
            handle_request(&app, Method::GET, "/site.css", headers, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let response =
            handle_request(&app, Method::POST, "/site.css", HeaderMap::new(), Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
