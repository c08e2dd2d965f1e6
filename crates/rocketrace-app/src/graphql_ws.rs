// graphql-transport-ws subscription client for rocket progress.
//
// One WebSocket connection per subscription. The connection is owned by a
// background task that forwards decoded events to the returned stream and
// closes the subscription once the stream is dropped.

use futures_util::stream::{self, Stream};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use rocketrace_core::model::ProgressEvent;
use rocketrace_core::transport::{ProgressStream, TransportError};

use crate::graphql::GraphqlResponse;

const SUBPROTOCOL: &str = "graphql-transport-ws";
const SUBSCRIPTION_ID: &str = "1";
const EVENT_BUFFER: usize = 32;

const PROGRESS_SUBSCRIPTION: &str = "subscription ($raceId: ID!, $rocketId: ID!) { \
     rocketProgress(raceId: $raceId, rocketId: $rocketId) { raceId rocketId progress exploded } }";

// ---------------------------------------------------------------------------
// Protocol frames
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    ConnectionInit {},
    Subscribe { id: &'a str, payload: Value },
    Complete { id: &'a str },
    Pong {},
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    ConnectionAck {},
    Next { id: String, payload: Value },
    Error { id: String, payload: Value },
    Complete { id: String },
    Ping {},
    Pong {},
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressData {
    rocket_progress: ProgressEvent,
}

/// What one text frame means for subscription `id`.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    Ack,
    Event(ProgressEvent),
    Failed(TransportError),
    Done,
    Ping,
    Ignore,
}

pub fn interpret(text: &str, id: &str) -> Incoming {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Ignoring unrecognised subscription frame: {e}");
            return Incoming::Ignore;
        }
    };
    match frame {
        ServerFrame::ConnectionAck {} => Incoming::Ack,
        ServerFrame::Ping {} => Incoming::Ping,
        ServerFrame::Pong {} => Incoming::Ignore,
        ServerFrame::Next { id: frame_id, .. }
        | ServerFrame::Error { id: frame_id, .. }
        | ServerFrame::Complete { id: frame_id }
            if frame_id != id =>
        {
            Incoming::Ignore
        }
        ServerFrame::Next { payload, .. } => {
            match serde_json::from_value::<GraphqlResponse<ProgressData>>(payload) {
                Ok(response) => match response.into_result() {
                    Ok(data) => Incoming::Event(data.rocket_progress),
                    Err(e) => Incoming::Failed(e),
                },
                Err(e) => Incoming::Failed(TransportError::Decode(e.to_string())),
            }
        }
        ServerFrame::Error { payload, .. } => Incoming::Failed(TransportError::Subscription(payload.to_string())),
        ServerFrame::Complete { .. } => Incoming::Done,
    }
}

fn encode(frame: &ClientFrame<'_>) -> Message {
    // Serializing these frames cannot fail: every field is a string or a Value.
    Message::Text(serde_json::to_string(frame).unwrap_or_default().into())
}

// ---------------------------------------------------------------------------
// Subscribe
// ---------------------------------------------------------------------------

/// Open a progress subscription for one rocket in one race.
///
/// Returns once the server has acknowledged the connection and the subscribe
/// frame has been sent. Dropping the returned stream completes the
/// subscription and closes the socket.
pub async fn subscribe(ws_url: &str, race_id: &str, rocket_id: &str) -> Result<ProgressStream, TransportError> {
    let mut request = ws_url
        .into_client_request()
        .map_err(|e| TransportError::Subscription(format!("invalid url {ws_url}: {e}")))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::Subscription(e.to_string()))?;
    let (mut write, mut read) = socket.split();

    send(&mut write, &ClientFrame::ConnectionInit {}).await?;
    wait_for_ack(&mut read).await?;

    let payload = json!({
        "query": PROGRESS_SUBSCRIPTION,
        "variables": { "raceId": race_id, "rocketId": rocket_id },
    });
    send(
        &mut write,
        &ClientFrame::Subscribe {
            id: SUBSCRIPTION_ID,
            payload,
        },
    )
    .await?;
    info!(race_id, rocket_id, "Progress subscription opened");

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let label = format!("{race_id}/{rocket_id}");
    tokio::spawn(async move {
        let end = process_message_stream(&mut read, &mut write, &tx, SUBSCRIPTION_ID).await;
        debug!(subscription = %label, ?end, "subscription task finished");
        if end == StreamEnd::ReceiverDropped {
            let _ = write
                .send(encode(&ClientFrame::Complete { id: SUBSCRIPTION_ID }))
                .await;
        }
        let _ = write.close().await;
    });

    Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed())
}

async fn send<Si>(sink: &mut Si, frame: &ClientFrame<'_>) -> Result<(), TransportError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: std::fmt::Display,
{
    sink.send(encode(frame))
        .await
        .map_err(|e| TransportError::Subscription(e.to_string()))
}

async fn wait_for_ack<St>(read: &mut St) -> Result<(), TransportError>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match interpret(text.as_str(), SUBSCRIPTION_ID) {
                Incoming::Ack => return Ok(()),
                Incoming::Failed(e) => return Err(e),
                _ => continue,
            },
            Ok(Message::Close(_)) => return Err(TransportError::Closed),
            Ok(_) => continue,
            Err(e) => return Err(TransportError::Subscription(e.to_string())),
        }
    }
    Err(TransportError::Closed)
}

/// Why the message loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    ReceiverDropped,
    /// Server sent `complete` for the subscription.
    Completed,
    Failed,
    Closed,
}

/// Forward progress events from raw WebSocket messages into `events`,
/// answering protocol pings on `sink`. Generic over both ends so it can be
/// driven by in-memory streams.
pub async fn process_message_stream<St, Si>(
    stream: &mut St,
    sink: &mut Si,
    events: &mpsc::Sender<Result<ProgressEvent, TransportError>>,
    id: &str,
) -> StreamEnd
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: std::fmt::Display,
{
    loop {
        let msg = tokio::select! {
            _ = events.closed() => return StreamEnd::ReceiverDropped,
            msg = stream.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                let _ = events.send(Err(TransportError::Closed)).await;
                return StreamEnd::Closed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("Subscription socket error: {e}");
                let _ = events.send(Err(TransportError::Subscription(e.to_string()))).await;
                return StreamEnd::Failed;
            }
        };

        match interpret(text.as_str(), id) {
            Incoming::Event(event) => {
                if events.send(Ok(event)).await.is_err() {
                    return StreamEnd::ReceiverDropped;
                }
            }
            Incoming::Failed(e) => {
                let _ = events.send(Err(e)).await;
                return StreamEnd::Failed;
            }
            Incoming::Done => return StreamEnd::Completed,
            Incoming::Ping => {
                if let Err(e) = sink.send(encode(&ClientFrame::Pong {})).await {
                    warn!("Failed to answer subscription ping: {e}");
                }
            }
            Incoming::Ack | Incoming::Ignore => {}
        }
    }
}
