//! Per-connection request loop.
//!
//! Frames are read one at a time. Cheap requests (echo, delref, stop) are
//! answered inline; `run` and `sleep-echo` are spawned so the loop keeps
//! reading, and their responses may arrive out of order. All writes for a
//! connection go through one mutex-guarded sink.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonLinesCodec;
use crate::bridge::protocol::Request;
use crate::tasks::TaskRegistry;
use crate::worker::{Engine, Worker};

type Writer<S> = Arc<Mutex<FramedWrite<WriteHalf<S>, JsonLinesCodec<Value>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Serve one connection until EOF, `stop`, or a malformed frame.
///
/// Spawned requests keep the write half alive, so their responses are still
/// delivered after the read loop ends.
pub async fn handle_connection<S, E>(
    stream: S,
    worker: Arc<Worker<E>>,
    tasks: TaskRegistry,
    max_line_length: usize,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
    E: Engine,
{
    let (read, write) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read, JsonLinesCodec::<Value>::new(max_line_length));
    let writer: Writer<S> = Arc::new(Mutex::new(FramedWrite::new(
        write,
        JsonLinesCodec::new(max_line_length),
    )));

    loop {
        let frame = match reader.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Malformed frame from client, closing connection");
                break;
            }
            None => {
                tracing::debug!("Client closed connection");
                break;
            }
        };

        let request = match Request::parse(frame) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request from client, closing connection");
                break;
            }
        };

        tracing::trace!(tag = request.tag(), "Received request");
        if dispatch(request, &worker, &writer, &tasks).await == Flow::Close {
            break;
        }
    }
}

async fn dispatch<S, E>(
    request: Request,
    worker: &Arc<Worker<E>>,
    writer: &Writer<S>,
    tasks: &TaskRegistry,
) -> Flow
where
    S: AsyncWrite + Send + 'static,
    E: Engine,
{
    match request {
        Request::Echo { message } => {
            send(writer, message).await;
        }
        Request::SleepEcho { message, delay } => {
            let writer = Arc::clone(writer);
            tasks.spawn(async move {
                tokio::time::sleep(delay).await;
                send(&writer, message).await;
            });
        }
        Request::Run(run) => {
            let worker = Arc::clone(worker);
            let writer = Arc::clone(writer);
            tasks.spawn(async move {
                // Runs inline on the scheduler thread: guest code never
                // interleaves with other requests.
                let response = worker.run(&run);
                send(&writer, response).await;
            });
        }
        Request::Delref { handle } => worker.release(&handle),
        Request::Stop => {
            tracing::debug!("Stop requested");
            return Flow::Close;
        }
        Request::Unknown { tag } => {
            tracing::warn!(%tag, "Ignoring request with unknown tag");
        }
    }
    Flow::Continue
}

async fn send<S, T>(writer: &Writer<S>, message: T)
where
    S: AsyncWrite,
    T: Serialize,
{
    let mut w = writer.lock().await;
    if let Err(e) = w.send(message).await {
        tracing::warn!(error = %e, "Failed to write response");
    }
}
