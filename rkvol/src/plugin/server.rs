//! HTTP server on the plugin's Unix socket.

use std::convert::Infallible;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::header::CONTENT_TYPE as CONTENT_TYPE_HEADER;
use hyper::server::accept;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use libvolume::{ClusterConnector, DeviceBinder, VolumeDriver};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::handler::{Reply, dispatch};
use super::protocol::CONTENT_TYPE;

/// Serve the plugin API on `socket` until `shutdown` resolves.
///
/// A stale socket left by a previous run is replaced.  The socket file is
/// removed again on a clean shutdown.
pub async fn serve<C, B, F>(
    driver: Arc<VolumeDriver<C, B>>,
    socket: &Path,
    shutdown: F,
) -> Result<()>
where
    C: ClusterConnector + 'static,
    B: DeviceBinder + 'static,
    F: Future<Output = ()>,
{
    if let Some(parent) = socket.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create socket directory {}", parent.display()))?;
    }
    match tokio::fs::remove_file(socket).await {
        Ok(()) => warn!(socket = %socket.display(), "removed stale plugin socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to remove stale socket {}", socket.display()));
        }
    }

    let listener = UnixListener::bind(socket)
        .with_context(|| format!("Failed to bind plugin socket {}", socket.display()))?;
    info!(socket = %socket.display(), "volume plugin listening");

    let incoming = futures::stream::unfold(listener, |listener| async move {
        let conn = listener.accept().await.map(|(stream, _)| stream);
        Some((conn, listener))
    });

    let make_svc = make_service_fn(move |_conn: &UnixStream| {
        let driver = Arc::clone(&driver);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(Arc::clone(&driver), req)))
        }
    });

    Server::builder(accept::from_stream(incoming))
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Volume plugin server failed")?;

    if let Err(e) = tokio::fs::remove_file(socket).await {
        warn!(socket = %socket.display(), error = %e, "failed to remove plugin socket");
    }
    Ok(())
}

async fn handle<C, B>(
    driver: Arc<VolumeDriver<C, B>>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible>
where
    C: ClusterConnector,
    B: DeviceBinder,
{
    let path = req.uri().path().to_owned();
    debug!(method = %req.method(), %path, "plugin request");

    if req.method() != Method::POST {
        return Ok(respond(Reply::error(
            StatusCode::METHOD_NOT_ALLOWED,
            "plugin endpoints only accept POST",
        )));
    }

    let reply = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => dispatch(&driver, &path, &body).await,
        Err(e) => Reply::error(StatusCode::BAD_REQUEST, format!("unable to read body: {e}")),
    };
    Ok(respond(reply))
}

fn respond(reply: Reply) -> Response<Body> {
    let mut response = Response::new(Body::from(reply.body.to_string()));
    *response.status_mut() = reply.status;
    if let Ok(value) = CONTENT_TYPE.parse() {
        response.headers_mut().insert(CONTENT_TYPE_HEADER, value);
    }
    response
}
