use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};

use super::{AppState, Error};
use crate::cookies::{CookieError, BOT_ID};
use crate::import::Session;
use crate::jobs::{JobError, JobStatus};
use crate::kv::{self, keys};
use crate::model::ConnectionRecord;
use crate::oauth::{authorize_url, resolve_parent_page};
use crate::updates::UpdateHub;

pub async fn healthz() -> &'static str {
    "ok"
}

/// Bot id from the session cookie. A missing or tampered cookie means the
/// browser never completed the OAuth flow.
fn session_bot_id(state: &AppState, headers: &HeaderMap) -> Result<String, Error> {
    match state.cookies.read_string(headers, BOT_ID) {
        Ok(id) => Ok(id),
        Err(CookieError::Missing | CookieError::InvalidValue) => Err(Error::Unauthorized),
        Err(err) => Err(err.into()),
    }
}

pub async fn home(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let authenticated = session_bot_id(&state, &headers).is_ok();
    let link = authorize_url(
        &state.config.notion.client_id,
        &state.config.notion.redirect_uri,
    )
    .replace('&', "&amp;");
    let status = if authenticated {
        r#"<p>Connected. Import progress:</p>
<form method="post" action="/import"><button type="submit">Import again</button></form>
<pre id="events"></pre>
<script>
const out = document.getElementById("events");
new EventSource("/api/events").onmessage = (e) => { out.textContent += e.data + "\n"; };
</script>"#
    } else {
        "<p>Not connected.</p>"
    };
    Html(format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>MITRE ATT&amp;CK for Notion</title></head>
<body>
<h1>MITRE ATT&amp;CK for Notion</h1>
<p><a href="{link}">Connect to Notion</a></p>
{status}
</body>
</html>
"#
    ))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, Error> {
    if let Some(reason) = params.error {
        info!(%reason, "authorization cancelled by user");
        return Err(Error::Cancelled(reason));
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::BadRequest("missing authorization code".into()))?;

    let token = state.oauth.exchange(&code).await?;
    let parent_page_id = resolve_parent_page(
        &token,
        state.config.notion.default_parent_page_id.as_deref(),
    )?;
    let bot_id = token.bot_id.clone();
    let record = ConnectionRecord {
        token: token.access_token.clone(),
        parent_page_id: parent_page_id.clone(),
        workspace_name: token.workspace_name.clone(),
    };
    kv::set_json(state.store.as_ref(), &keys::connection(&bot_id), &record).await?;
    let cookie = state.cookies.set_cookie(BOT_ID, bot_id.as_bytes())?;
    info!(%bot_id, workspace = ?record.workspace_name, "connected to Notion");

    let session = Session::new(
        bot_id.as_str(),
        parent_page_id,
        state.connector.connect(&record.token),
    );
    match state.jobs.start(session) {
        Ok((run_id, _)) => info!(%bot_id, %run_id, "import scheduled after connect"),
        Err(JobError::AlreadyRunning { run_id }) => {
            info!(%bot_id, %run_id, "import already running; not starting another")
        }
    }

    Ok((
        StatusCode::SEE_OTHER,
        [
            (header::LOCATION, state.config.server.post_connect_redirect.clone()),
            (header::SET_COOKIE, cookie),
        ],
    )
        .into_response())
}

pub async fn start_import(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<serde_json::Value>), Error> {
    let bot_id = session_bot_id(&state, &headers)?;
    let session = match Session::load(state.store.as_ref(), state.connector.as_ref(), &bot_id).await
    {
        Ok(session) => session,
        Err(err) if err.is_not_found() => return Err(Error::Unauthorized),
        Err(err) => return Err(err.into()),
    };
    match state.jobs.start(session) {
        Ok((run_id, _)) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "started", "run_id": run_id })),
        )),
        Err(JobError::AlreadyRunning { run_id }) => Err(Error::Conflict(format!(
            "an import is already running (run {run_id})"
        ))),
    }
}

pub async fn import_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<JobStatus>, Error> {
    let bot_id = session_bot_id(&state, &headers)?;
    state
        .jobs
        .status(&bot_id)
        .map(Json)
        .ok_or_else(|| Error::NotFound("no import has run for this workspace".into()))
}

/// A bot's update subscription that releases the channel once dropped.
struct Subscription {
    rx: Option<broadcast::Receiver<String>>,
    updates: UpdateHub,
    bot_id: String,
}

impl Subscription {
    async fn recv(&mut self) -> Result<String, RecvError> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => Err(RecvError::Closed),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The receiver must be gone before release checks the subscriber count.
        drop(self.rx.take());
        self.updates.release(&self.bot_id);
    }
}

pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Error> {
    let bot_id = session_bot_id(&state, &headers)?;
    let idle = Duration::from_secs(state.config.import.events_idle_timeout_secs);
    let mut subscription = Subscription {
        rx: Some(state.updates.subscribe(&bot_id)),
        updates: state.updates.clone(),
        bot_id,
    };

    let stream = async_stream::stream! {
        loop {
            match tokio::time::timeout(idle, subscription.recv()).await {
                Ok(Ok(message)) => yield Ok(Event::default().data(message)),
                Ok(Err(RecvError::Lagged(n))) => {
                    yield Ok(Event::default().data(format!("... {n} updates dropped")));
                }
                Ok(Err(RecvError::Closed)) => break,
                Err(_) => {
                    debug!(bot_id = %subscription.bot_id, "event stream idle; closing");
                    break;
                }
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
