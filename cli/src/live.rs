//! Live room sessions over the WebSocket endpoint.
//!
//! `watch` mirrors a room into a headless reconciler: the saved snapshot is
//! fetched over REST first, then every server event is applied as it
//! arrives. Outbound events queued by the session are flushed to the socket
//! after each step.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use whiteboard_canvas::engine::HeadlessEngine;
use whiteboard_canvas::reconciler::CanvasReconciler;
use whiteboard_canvas::session::RoomSession;
use whiteboard_frames::{ClientEvent, ServerEvent, decode_server, encode_client};

use crate::{ChatArgs, CliError, WatchArgs, api};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Session = RoomSession<HeadlessEngine, Vec<ClientEvent>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn watch(base_url: &str, args: WatchArgs) -> Result<(), CliError> {
    let user_id = args.identity.resolved_user_id();
    let mut session = RoomSession::new(CanvasReconciler::new(HeadlessEngine::new(), Vec::new()), user_id, args.identity.username);

    let snapshot = api::fetch_canvas(base_url, &args.room_id).await?;
    let loaded = session.hydrate(&snapshot)?;
    eprintln!("loaded {loaded} shapes from saved canvas");

    let mut stream = connect(base_url, &mut session).await?;
    session.join(args.room_id.as_str());
    flush_outbound(&mut stream, &mut session).await?;

    let mut seen = 0_usize;
    loop {
        let event = tokio::select! {
            event = recv_event(&mut stream) => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        let event = match event {
            Ok(event) => event,
            Err(CliError::WsClosed) => {
                session.on_disconnected("server closed the connection");
                eprintln!("{}", describe_status(&session));
                return Ok(());
            }
            Err(error) => {
                session.on_connection_error(error.to_string());
                return Err(error);
            }
        };

        let line = describe(&event);
        session.handle(event);
        println!("{line} | users={} shapes={}", session.user_count(), session.reconciler().scene().len());
        flush_outbound(&mut stream, &mut session).await?;

        seen = seen.saturating_add(1);
        if args.max_events.is_some_and(|limit| seen >= limit) {
            break;
        }
    }

    session.leave();
    flush_outbound(&mut stream, &mut session).await?;
    stream.close(None).await?;
    Ok(())
}

pub async fn chat(base_url: &str, args: ChatArgs) -> Result<(), CliError> {
    let user_id = args.identity.resolved_user_id();
    let mut session = RoomSession::new(CanvasReconciler::new(HeadlessEngine::new(), Vec::new()), user_id, args.identity.username);

    let mut stream = connect(base_url, &mut session).await?;
    session.join(args.room_id.as_str());
    flush_outbound(&mut stream, &mut session).await?;
    wait_for(&mut stream, &mut session, "room-joined", |event| matches!(event, ServerEvent::RoomJoined(_))).await?;

    let message = args.message.join(" ");
    if !session.send_chat(&message) {
        return Err(CliError::ServerError { context: "chat".to_owned(), message: "message is empty".to_owned() });
    }
    flush_outbound(&mut stream, &mut session).await?;
    let own_user = session.user_id().to_owned();
    wait_for(&mut stream, &mut session, "chat-message", |event| {
        matches!(event, ServerEvent::ChatMessage(chat) if chat.user_id == own_user)
    })
    .await?;
    eprintln!("sent to {}", args.room_id);

    session.leave();
    flush_outbound(&mut stream, &mut session).await?;
    stream.close(None).await?;
    Ok(())
}

// =============================================================================
// TRANSPORT
// =============================================================================

async fn connect(base_url: &str, session: &mut Session) -> Result<Stream, CliError> {
    let (mut stream, _) = connect_async(ws_url(base_url)?).await?;
    let connected = tokio::time::timeout(CONNECT_TIMEOUT, recv_event(&mut stream))
        .await
        .map_err(|_| CliError::Timeout("connected"))??;
    if !matches!(connected, ServerEvent::Connected(_)) {
        return Err(CliError::ServerError { context: "connect".to_owned(), message: describe(&connected) });
    }
    session.handle(connected);
    Ok(stream)
}

async fn wait_for(
    stream: &mut Stream,
    session: &mut Session,
    label: &'static str,
    done: impl Fn(&ServerEvent) -> bool,
) -> Result<(), CliError> {
    let fut = async {
        loop {
            let event = recv_event(stream).await?;
            if let ServerEvent::Error(notice) = &event {
                return Err(CliError::ServerError { context: label.to_owned(), message: notice.message.clone() });
            }
            let matched = done(&event);
            session.handle(event);
            if matched {
                return Ok(());
            }
        }
    };
    tokio::time::timeout(REPLY_TIMEOUT, fut).await.map_err(|_| CliError::Timeout(label))?
}

async fn recv_event(stream: &mut Stream) -> Result<ServerEvent, CliError> {
    loop {
        let Some(message) = stream.next().await else {
            return Err(CliError::WsClosed);
        };
        match message? {
            Message::Text(text) => return Ok(decode_server(text.as_str())?),
            Message::Close(_) => return Err(CliError::WsClosed),
            _ => {}
        }
    }
}

async fn flush_outbound(stream: &mut Stream, session: &mut Session) -> Result<(), CliError> {
    let outbound: Vec<ClientEvent> = session.reconciler_mut().sink_mut().drain(..).collect();
    for event in outbound {
        stream.send(Message::text(encode_client(&event)?)).await?;
    }
    Ok(())
}

fn ws_url(base_url: &str) -> Result<String, CliError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }
    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

// =============================================================================
// OUTPUT
// =============================================================================

fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::Connected(c) => format!("connected session={}", c.session_id),
        ServerEvent::RoomJoined(r) => format!("joined {} ({} users)", r.room_id, r.user_count),
        ServerEvent::UserJoined(p) => format!("{} joined", p.username),
        ServerEvent::UserLeft(p) => format!("{} left", p.username),
        ServerEvent::DrawingEvent(d) => {
            let object_id = d.data.get("objectId").and_then(serde_json::Value::as_str).unwrap_or("-");
            format!("{} {} by {}", d.kind.as_str(), object_id, d.username)
        }
        ServerEvent::CanvasCleared(a) => format!("canvas cleared by {}", a.username),
        ServerEvent::ChatMessage(c) => format!("<{}> {}", c.username, c.message),
        ServerEvent::UserTyping(t) => format!("{} typing={}", t.username, t.is_typing),
        ServerEvent::CanvasSaved(s) => match &s.error {
            Some(error) => format!("save failed: {error}"),
            None => format!("saved success={}", s.success),
        },
        ServerEvent::Error(e) => format!("error: {}", e.message),
    }
}

fn describe_status(session: &Session) -> String {
    format!("{:?}", session.status())
}

#[cfg(test)]
#[path = "live_test.rs"]
mod tests;
