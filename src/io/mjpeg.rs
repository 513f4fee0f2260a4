//! MJPEG viewer HTTP server
//!
//! Every `GET /video` opens its own decoder on the annotated stream and relays
//! frames as `multipart/x-mixed-replace` JPEG parts. The relay ends on the
//! first read failure or when the client goes away; there is no reconnect.

use crate::io::ffmpeg::{FrameSource, FrameStream, VideoFormat};
use crate::io::jpeg::encode_jpeg;
use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

pub const BOUNDARY: &str = "frame";

/// Chunks buffered per viewer before the relay waits on the client
const RELAY_BUFFER: usize = 2;

const INDEX_PAGE: &str = r#"<html>
    <head>
        <title>Presence Live Stream</title>
    </head>
    <body style="text-align:center;">
        <h1>Real-Time Person Detection</h1>
        <img src="/video" width="900">
    </body>
</html>
"#;

type ViewerBody = UnsyncBoxBody<Bytes, Infallible>;
pub type ChunkSender = mpsc::Sender<Result<Frame<Bytes>, Infallible>>;

pub struct ViewerState {
    pub ffmpeg_bin: String,
    pub source_url: String,
    pub format: VideoFormat,
    pub jpeg_quality: u8,
}

/// One multipart part: boundary, part header, JPEG bytes, CRLF
pub fn mjpeg_chunk(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(jpeg.len() + 64);
    buf.put_slice(b"--");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    buf.put_slice(jpeg);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Pump frames from `source` into `tx` until either side fails.
///
/// Returns the number of chunks sent.
pub async fn relay_frames<S: FrameStream>(
    mut source: S,
    tx: ChunkSender,
    jpeg_quality: u8,
) -> u64 {
    let mut sent = 0u64;
    loop {
        let frame = match source.next_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, sent = %sent, "mjpeg_source_ended");
                return sent;
            }
        };
        let jpeg = match encode_jpeg(&frame, jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!(error = %e, "mjpeg_encode_error");
                return sent;
            }
        };
        if tx.send(Ok(Frame::data(mjpeg_chunk(&jpeg)))).await.is_err() {
            debug!(sent = %sent, "mjpeg_client_disconnected");
            return sent;
        }
        sent += 1;
    }
}

fn full(body: impl Into<Bytes>) -> ViewerBody {
    Full::new(body.into()).boxed_unsync()
}

fn video_response(state: Arc<ViewerState>) -> Response<ViewerBody> {
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);

    tokio::spawn(async move {
        let source = match FrameSource::open(&state.ffmpeg_bin, &state.source_url, state.format) {
            Ok(source) => source,
            Err(e) => {
                warn!(error = %e, url = %state.source_url, "mjpeg_source_open_failed");
                return;
            }
        };
        info!(url = %state.source_url, "mjpeg_viewer_connected");
        let sent = relay_frames(source, tx, state.jpeg_quality).await;
        info!(frames = %sent, "mjpeg_viewer_closed");
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", format!("multipart/x-mixed-replace; boundary={BOUNDARY}"))
        .header("Cache-Control", "no-cache")
        .body(StreamBody::new(ReceiverStream::new(rx)).boxed_unsync())
        .expect("static response should not fail")
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ViewerState>,
) -> Result<Response<ViewerBody>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(full(INDEX_PAGE))
            .expect("static response should not fail"),
        (&Method::GET, "/video") => video_response(state),
        (&Method::GET, "/health") => Response::builder()
            .status(StatusCode::OK)
            .body(full("ok"))
            .expect("static response should not fail"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(full("Not Found"))
            .expect("static response should not fail"),
    };
    Ok(response)
}

/// Serve the viewer on an already-bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    state: Arc<ViewerState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(error = %e, "viewer_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "viewer_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mjpeg_viewer_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind and run the MJPEG viewer
pub async fn start_viewer(
    addr: SocketAddr,
    state: Arc<ViewerState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, source = %state.source_url, "mjpeg_viewer_started");
    serve(listener, state, shutdown).await
}
