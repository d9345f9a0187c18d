//! The streamable HTTP transport.
//!
//! Clients `POST` JSON-RPC messages to `/mcp`. The reply is a plain JSON body, unless the
//! client accepts `text/event-stream` and the request produced notifications, in which case
//! the notifications and the response are sent as a stream of server-sent events.
//!
//! A successful `initialize` starts a session, whose ID is returned in the `Mcp-Session-Id`
//! header. Clients echo the header on later requests and end the session with `DELETE /mcp`.
//! Requests for unknown sessions are rejected with `404`, telling the client to initialize a
//! new session.

use super::super::server::{Outgoing, Reply, Server};
use anyhow::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tide::http::{headers::ACCEPT, mime};
use tide::{Request, Response, StatusCode};

/// The header carrying the session ID.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// The path at which MCP is served.
pub const ENDPOINT: &str = "/mcp";

/// How long a session may go unused before it is forgotten.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// State shared by all HTTP requests.
pub struct Shared {
    server: Server,
    sessions: Sessions,
}

/// Open sessions, with the time each was last used.
///
/// Clients are not required to end their sessions, so sessions idle for longer than the timeout
/// are dropped whenever a new session starts.
struct Sessions {
    timeout: Duration,
    last_used: Mutex<HashMap<String, Instant>>,
}

impl Sessions {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_used: Default::default(),
        }
    }

    /// Mark a session as used, returning whether it exists.
    fn touch(&self, id: &str) -> bool {
        let mut sessions = self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(id) {
            Some(last_used) if last_used.elapsed() <= self.timeout => {
                *last_used = Instant::now();
                true
            }
            Some(_) => {
                tracing::info!("session {id} expired");
                sessions.remove(id);
                false
            }
            None => false,
        }
    }

    fn start(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.last_used.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, last_used| last_used.elapsed() <= self.timeout);
        if sessions.len() < before {
            tracing::info!("dropped {} idle sessions", before - sessions.len());
        }
        tracing::info!("starting session {id}");
        sessions.insert(id.clone(), Instant::now());
        id
    }

    fn end(&self, id: &str) -> bool {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

type State = Arc<Shared>;

/// Build the HTTP application serving `server`.
pub fn app(server: Server) -> tide::Server<State> {
    let mut app = tide::with_state(Arc::new(Shared {
        server,
        sessions: Sessions::new(SESSION_TIMEOUT),
    }));
    app.at(ENDPOINT).post(post).get(get).delete(delete);
    app
}

/// Serve MCP over HTTP on `host:port` until the process is stopped.
pub async fn serve(server: Server, host: &str, port: u16) -> Result<(), Error> {
    tracing::info!("serving MCP on http://{host}:{port}{ENDPOINT}");
    app(server).listen(format!("{host}:{port}")).await?;
    Ok(())
}

fn session_id(req: &Request<State>) -> Option<String> {
    req.header(SESSION_HEADER)
        .map(|values| values.last().as_str().to_owned())
}

async fn post(mut req: Request<State>) -> tide::Result {
    let body = req.body_string().await?;
    if let Some(id) = session_id(&req) {
        if !req.state().sessions.touch(&id) {
            tracing::warn!("request for unknown session {id}");
            return Ok(Response::new(StatusCode::NotFound));
        }
    }
    let accepts_events = req
        .header(ACCEPT)
        .map(|values| {
            values
                .iter()
                .any(|value| value.as_str().contains(mime::SSE.essence()))
        })
        .unwrap_or(false);
    let initialize = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|msg| msg.get("method").cloned())
        .map_or(false, |method| method == "initialize");

    let reply = req.state().server.handle_message(&body).await;
    let Some(outgoing) = &reply.response else {
        // Only notifications or responses were posted.
        return Ok(Response::new(StatusCode::Accepted));
    };

    let mut res = if accepts_events && !reply.notifications.is_empty() {
        Response::builder(StatusCode::Ok)
            .content_type(mime::SSE)
            .body(event_stream(&reply)?)
            .build()
    } else {
        Response::builder(StatusCode::Ok)
            .content_type(mime::JSON)
            .body(serde_json::to_string(outgoing)?)
            .build()
    };
    if initialize && outgoing.is_successful() {
        res.insert_header(SESSION_HEADER, req.state().sessions.start());
    }
    Ok(res)
}

/// Render a reply as server-sent events, one per message.
fn event_stream(reply: &Reply) -> Result<String, serde_json::Error> {
    let mut events = String::new();
    for notification in &reply.notifications {
        push_event(&mut events, &serde_json::to_string(notification)?);
    }
    if let Some(response) = &reply.response {
        push_event(&mut events, &serde_json::to_string::<Outgoing>(response)?);
    }
    Ok(events)
}

fn push_event(events: &mut String, data: &str) {
    events.push_str("event: message\ndata: ");
    events.push_str(data);
    events.push_str("\n\n");
}

/// The server never initiates messages, so there is no stream to open.
async fn get(_req: Request<State>) -> tide::Result {
    Ok(Response::new(StatusCode::MethodNotAllowed))
}

async fn delete(req: Request<State>) -> tide::Result {
    let Some(id) = session_id(&req) else {
        return Ok(Response::new(StatusCode::BadRequest));
    };
    if req.state().sessions.end(&id) {
        tracing::info!("ended session {id}");
        Ok(Response::new(StatusCode::Ok))
    } else {
        Ok(Response::new(StatusCode::NotFound))
    }
}
