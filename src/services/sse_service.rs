use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::{
    dto::sse::{Handshake, ServerEvent},
    error::ServiceError,
    state::SharedState,
};

const EVENT_HANDSHAKE: &str = "handshake";

/// Subscribe to a game's event stream.
///
/// Returns the receiver together with the handshake event that opens the stream.
pub fn subscribe_game(
    state: &SharedState,
    code: &str,
) -> Result<(broadcast::Receiver<ServerEvent>, Option<ServerEvent>), ServiceError> {
    let handle = state.game(code)?;
    let receiver = handle.sse().subscribe();
    debug!(game = %code, listeners = handle.sse().receiver_count(), "SSE subscriber added");

    let handshake = ServerEvent::json(
        Some(EVENT_HANDSHAKE.to_string()),
        &Handshake {
            game: code.to_string(),
            message: format!("subscribed to game {code}"),
        },
    )
    .ok();
    Ok((receiver, handshake))
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Convert a broadcast receiver into an SSE response, forwarding events until
/// the client disconnects or the game is discarded.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    handshake: Option<ServerEvent>,
    game: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if let Some(handshake) = handshake
            && tx.send(Ok(to_event(handshake))).await.is_err()
        {
            return;
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(game = %game, skipped, "SSE client lagging");
                            continue;
                        }
                    }
                }
            }
        }

        info!(game = %game, "SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
