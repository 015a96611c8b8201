//! Server-sent event streams.

use std::collections::VecDeque;
use std::time::Instant;

use actix_web::http::header;
use actix_web::web::Bytes;
use actix_web::{Error, HttpResponse, Responder, get, web};
use futures_util::{Stream, stream::unfold};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, Interval, MissedTickBehavior};

use crate::events::HubEvent;
use crate::state::AppState;

use super::playback::current_status;

const PING_INTERVAL: Duration = Duration::from_secs(15);
const STATUS_REFRESH: Duration = Duration::from_secs(5);

struct StatusStreamState {
    state: web::Data<AppState>,
    receiver: broadcast::Receiver<HubEvent>,
    interval: Interval,
    pending: VecDeque<Bytes>,
    last_status: Option<String>,
    last_ping: Instant,
}

struct LibraryStreamState {
    state: web::Data<AppState>,
    receiver: broadcast::Receiver<HubEvent>,
    interval: Interval,
    pending: VecDeque<Bytes>,
    last_ping: Instant,
}

fn sse_event(event: &str, data: &str) -> Bytes {
    let mut payload = String::new();
    payload.push_str("event: ");
    payload.push_str(event);
    payload.push('\n');
    for line in data.lines() {
        payload.push_str("data: ");
        payload.push_str(line);
        payload.push('\n');
    }
    payload.push('\n');
    Bytes::from(payload)
}

fn push_ping_if_needed(pending: &mut VecDeque<Bytes>, last_ping: &mut Instant) {
    if pending.is_empty() && last_ping.elapsed() >= PING_INTERVAL {
        *last_ping = Instant::now();
        pending.push_back(Bytes::from(": ping\n\n"));
    }
}

enum StreamSignal<E> {
    Tick,
    Event(Result<E, RecvError>),
}

async fn recv_signal<E: Clone>(
    receiver: &mut broadcast::Receiver<E>,
    interval: &mut Interval,
) -> StreamSignal<E> {
    tokio::select! {
        _ = interval.tick() => StreamSignal::Tick,
        result = receiver.recv() => StreamSignal::Event(result),
    }
}

fn sse_response<S>(stream: S) -> HttpResponse
where
    S: Stream<Item = Result<Bytes, Error>> + 'static,
{
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .streaming(stream)
}

fn status_json(state: &AppState) -> String {
    serde_json::to_string(&current_status(state)).unwrap_or_else(|_| "null".to_string())
}

fn albums_json(state: &AppState) -> String {
    let catalog = state.catalog.snapshot();
    let albums: Vec<_> = catalog.albums().iter().map(|a| a.to_info()).collect();
    serde_json::to_string(&albums).unwrap_or_else(|_| "[]".to_string())
}

#[utoipa::path(
    get,
    path = "/status/stream",
    responses(
        (status = 200, description = "Status event stream")
    )
)]
#[get("/status/stream")]
/// Stream status updates via server-sent events.
///
/// Sends the current status immediately, then again whenever it changes.
pub async fn status_stream(state: web::Data<AppState>) -> impl Responder {
    let initial_json = status_json(&state);
    let mut pending = VecDeque::new();
    pending.push_back(sse_event("status", &initial_json));

    let mut interval = tokio::time::interval(STATUS_REFRESH);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let receiver = state.events.subscribe();

    let stream = unfold(
        StatusStreamState {
            state: state.clone(),
            receiver,
            interval,
            pending,
            last_status: Some(initial_json),
            last_ping: Instant::now(),
        },
        |mut ctx| async move {
            loop {
                if let Some(bytes) = ctx.pending.pop_front() {
                    return Some((Ok::<Bytes, Error>(bytes), ctx));
                }

                // The tick also picks up position and device changes, which
                // never produce an event.
                let refresh = match recv_signal(&mut ctx.receiver, &mut ctx.interval).await {
                    StreamSignal::Tick => true,
                    StreamSignal::Event(Ok(HubEvent::StatusChanged)) => true,
                    StreamSignal::Event(Ok(_)) => false,
                    StreamSignal::Event(Err(RecvError::Lagged(_))) => true,
                    StreamSignal::Event(Err(RecvError::Closed)) => return None,
                };

                if refresh {
                    let json = status_json(&ctx.state);
                    if ctx.last_status.as_deref() != Some(json.as_str()) {
                        ctx.last_status = Some(json.clone());
                        ctx.pending.push_back(sse_event("status", &json));
                    }
                }

                push_ping_if_needed(&mut ctx.pending, &mut ctx.last_ping);
            }
        },
    );

    sse_response(stream)
}

#[utoipa::path(
    get,
    path = "/library/stream",
    responses(
        (status = 200, description = "Catalog and enrichment event stream")
    )
)]
#[get("/library/stream")]
/// Stream catalog publishes and enrichment progress via server-sent events.
pub async fn library_stream(state: web::Data<AppState>) -> impl Responder {
    let receiver = state.events.subscribe();
    let mut pending = VecDeque::new();
    pending.push_back(sse_event("albums", &albums_json(&state)));

    let mut interval = tokio::time::interval(PING_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let stream = unfold(
        LibraryStreamState {
            state: state.clone(),
            receiver,
            interval,
            pending,
            last_ping: Instant::now(),
        },
        |mut ctx| async move {
            loop {
                if let Some(bytes) = ctx.pending.pop_front() {
                    return Some((Ok::<Bytes, Error>(bytes), ctx));
                }

                match recv_signal(&mut ctx.receiver, &mut ctx.interval).await {
                    StreamSignal::Tick => {}
                    StreamSignal::Event(Ok(HubEvent::LibraryChanged))
                    | StreamSignal::Event(Err(RecvError::Lagged(_))) => {
                        let json = albums_json(&ctx.state);
                        ctx.pending.push_back(sse_event("albums", &json));
                    }
                    StreamSignal::Event(Ok(HubEvent::Enrichment(event))) => {
                        let json =
                            serde_json::to_string(&event).unwrap_or_else(|_| "null".to_string());
                        ctx.pending.push_back(sse_event("enrichment", &json));
                    }
                    StreamSignal::Event(Ok(HubEvent::StatusChanged)) => {}
                    StreamSignal::Event(Err(RecvError::Closed)) => return None,
                }

                push_ping_if_needed(&mut ctx.pending, &mut ctx.last_ping);
            }
        },
    );

    sse_response(stream)
}
