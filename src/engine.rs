//! Synchronous engine: session registry, request entry points and response handles.
//!
//! The engine owns a multi-thread tokio runtime and blocks on it, so it must
//! not be called from inside another runtime's async context.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Runtime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::executor::{self, Executed, RequestOptions};
use crate::session::{Session, SessionConfig};
use crate::wire::{Ack, Command, RequestPayload, WireCookie, WireResponse};

#[derive(Clone)]
struct SessionHandle {
    session: Arc<AsyncMutex<Session>>,
    /// Read without taking the session lock.
    catch_panics: bool,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            catch_panics: session.catch_panics(),
            session: Arc::new(AsyncMutex::new(session)),
        }
    }
}

/// How many destroyed ids are remembered for `session_closed` replies.
const MAX_TOMBSTONES: usize = 4096;

/// Destroyed ids, oldest evicted first once the cap is reached.
#[derive(Default)]
struct Tombstones {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Tombstones {
    fn insert(&mut self, id: &str) {
        if !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > MAX_TOMBSTONES {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|o| o != id);
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, SessionHandle>,
    /// Requests naming one of these fail instead of recreating the session.
    destroyed: Tombstones,
}

pub struct Engine {
    runtime: Runtime,
    registry: Mutex<Registry>,
    /// Response ids handed out and not yet freed.
    outstanding: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.session_count())
            .field("outstanding", &self.outstanding_responses())
            .finish()
    }
}

impl Engine {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("wraith-worker")
            .build()?;
        Ok(Self {
            runtime,
            registry: Mutex::new(Registry::default()),
            outstanding: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock leaves the maps consistent
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn outstanding_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.outstanding.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn generate_id(&self, prefix: &str) -> String {
        let mut random = [0u8; 8];
        if getrandom::getrandom(&mut random).is_err() {
            warn!("getrandom failed, ids fall back to the counter alone");
        }
        format!(
            "{}-{:x}-{}",
            prefix,
            u64::from_le_bytes(random),
            self.next_id.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Create a session and return its id.
    pub fn create_session(&self, config: SessionConfig) -> Result<String> {
        let id = match config.session_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.generate_id("session"),
        };
        let session = Session::new(id.clone(), &config)?;
        let mut registry = self.registry();
        if registry.sessions.contains_key(&id) {
            return Err(Error::config(format!("session {} already exists", id)));
        }
        // Explicit creation brings a destroyed id back
        registry.destroyed.remove(&id);
        registry.sessions.insert(id.clone(), SessionHandle::new(session));
        Ok(id)
    }

    /// Look up `id`, creating it from `config` on first sight.
    fn session_for(&self, id: &str, config: impl FnOnce() -> SessionConfig) -> Result<SessionHandle> {
        let mut registry = self.registry();
        if registry.destroyed.contains(id) {
            return Err(Error::session_closed(id));
        }
        if let Some(session) = registry.sessions.get(id) {
            return Ok(session.clone());
        }
        let handle = SessionHandle::new(Session::new(id, &config())?);
        registry.sessions.insert(id.to_string(), handle.clone());
        debug!(session = %id, "Session created from request");
        Ok(handle)
    }

    fn existing(&self, id: &str) -> Result<Arc<AsyncMutex<Session>>> {
        let registry = self.registry();
        registry
            .sessions
            .get(id)
            .map(|handle| handle.session.clone())
            .ok_or_else(|| Error::session_closed(id))
    }

    /// True while `id` still maps to `session` and not to a replacement.
    fn is_current(&self, id: &str, session: &Arc<AsyncMutex<Session>>) -> bool {
        self.registry()
            .sessions
            .get(id)
            .is_some_and(|handle| Arc::ptr_eq(&handle.session, session))
    }

    #[cfg(test)]
    fn tombstone_count(&self) -> usize {
        self.registry().destroyed.len()
    }

    /// Handle one JSON request document, returning the JSON response.
    pub fn request(&self, payload: &str) -> String {
        let response = match serde_json::from_str::<RequestPayload>(payload) {
            Ok(payload) => self.execute(payload),
            Err(e) => self.failure(None, "", &Error::from(e)),
        };
        to_json(&response)
    }

    /// Run a parsed request.
    pub fn execute(&self, payload: RequestPayload) -> WireResponse {
        let session_id = payload.session_id.clone().filter(|id| !id.is_empty());
        let target = payload.request_url.clone();
        match self.run(&payload, session_id.as_deref()) {
            Ok(executed) => {
                let id = self.generate_id("response");
                self.outstanding_set().insert(id.clone());
                WireResponse::from_executed(id, session_id, &executed, payload.is_byte_request)
            }
            Err(e) => {
                debug!(session = ?session_id, error = %e, kind = e.kind().as_str(), "Request failed");
                self.failure(session_id, &target, &e)
            }
        }
    }

    fn failure(&self, session_id: Option<String>, target: &str, err: &Error) -> WireResponse {
        let id = self.generate_id("response");
        self.outstanding_set().insert(id.clone());
        WireResponse::from_error(id, session_id, target, err)
    }

    fn run(&self, payload: &RequestPayload, session_id: Option<&str>) -> Result<Executed> {
        let request = payload.to_request()?;
        let handle = match session_id {
            Some(id) => self.session_for(id, || payload.session_config())?,
            None => SessionHandle::new(Session::new(
                self.generate_id("ephemeral"),
                &payload.session_config(),
            )?),
        };

        let catch_panics = payload.catch_panics || handle.catch_panics;
        let session = handle.session.clone();
        let result = self.block_on_session(handle.session, request, catch_panics);

        // The session may have been destroyed while the request was in flight
        match session_id {
            Some(id) if !self.is_current(id, &session) => Err(Error::session_closed(id)),
            _ => result,
        }
    }

    fn block_on_session(
        &self,
        session: Arc<AsyncMutex<Session>>,
        request: RequestOptions,
        catch_panics: bool,
    ) -> Result<Executed> {
        let task = async move {
            let mut session = session.lock().await;
            executor::execute(&mut session, request).await
        };
        if !catch_panics {
            return self.runtime.block_on(task);
        }
        self.runtime.block_on(async {
            match tokio::spawn(task).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let payload = e.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!("Request panicked: {}", message);
                    Err(Error::Panic(message))
                }
                Err(e) => Err(Error::Panic(e.to_string())),
            }
        })
    }

    /// Destroy a session. False when it was unknown or already destroyed.
    pub fn destroy_session(&self, id: &str) -> bool {
        let removed = {
            let mut registry = self.registry();
            let removed = registry.sessions.remove(id);
            if removed.is_some() {
                registry.destroyed.insert(id);
            }
            removed
        };
        match removed {
            Some(handle) => {
                // With a request in flight the connections close when it lets go
                if let Ok(mut session) = handle.session.try_lock() {
                    session.close();
                }
                debug!(session = %id, "Session destroyed");
                true
            }
            None => false,
        }
    }

    /// Destroy every live session, returning how many there were.
    pub fn destroy_all(&self) -> usize {
        let ids: Vec<String> = self.registry().sessions.keys().cloned().collect();
        ids.iter().filter(|id| self.destroy_session(id)).count()
    }

    /// Release a response handle. False when the id is unknown or already freed.
    pub fn free_memory(&self, response_id: &str) -> bool {
        self.outstanding_set().remove(response_id)
    }

    pub fn outstanding_responses(&self) -> usize {
        self.outstanding_set().len()
    }

    pub fn session_count(&self) -> usize {
        self.registry().sessions.len()
    }

    /// Cookies the session would send to `url`.
    pub fn get_cookies_from_session(&self, id: &str, url: &str) -> Result<Vec<WireCookie>> {
        let url = Url::parse(url)?;
        let session = self.existing(id)?;
        let session = self.runtime.block_on(session.lock_owned());
        Ok(session
            .cookies()
            .cookies_for_url(&url)
            .into_iter()
            .map(WireCookie::from)
            .collect())
    }

    /// Add cookies for `url`, returning the cookies now sent to it.
    pub fn add_cookies_to_session(
        &self,
        id: &str,
        url: &str,
        cookies: &[WireCookie],
    ) -> Result<Vec<WireCookie>> {
        let parsed = Url::parse(url)?;
        let converted = cookies
            .iter()
            .map(|c| c.to_cookie(&parsed))
            .collect::<Result<Vec<_>>>()?;
        let session = self.existing(id)?;
        {
            let mut session = self.runtime.block_on(session.lock_owned());
            for cookie in converted {
                session.cookies_mut().store(cookie);
            }
        }
        self.get_cookies_from_session(id, url)
    }

    /// Handle one line of the stdio protocol.
    pub fn handle(&self, line: &str) -> String {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => return to_json(&self.failure(None, "", &e)),
        };
        match command {
            Command::Request(payload) => to_json(&self.execute(*payload)),
            Command::CreateSession(config) => to_json(&match self.create_session(*config) {
                Ok(id) => Ack {
                    session_id: Some(id),
                    ..Ack::ok()
                },
                Err(e) => Ack::failed(&e),
            }),
            Command::DestroySession { session_id } => to_json(&Ack {
                success: self.destroy_session(&session_id),
                session_id: Some(session_id),
                ..Ack::default()
            }),
            Command::DestroyAll => to_json(&Ack {
                count: Some(self.destroy_all()),
                ..Ack::ok()
            }),
            Command::FreeMemory { id } => to_json(&Ack {
                success: self.free_memory(&id),
                ..Ack::default()
            }),
            Command::GetCookiesFromSession { session_id, url } => {
                to_json(&match self.get_cookies_from_session(&session_id, &url) {
                    Ok(cookies) => Ack {
                        session_id: Some(session_id),
                        cookies: Some(cookies),
                        ..Ack::ok()
                    },
                    Err(e) => Ack::failed(&e),
                })
            }
            Command::AddCookiesToSession {
                session_id,
                url,
                cookies,
            } => to_json(&match self.add_cookies_to_session(&session_id, &url, &cookies) {
                Ok(cookies) => Ack {
                    session_id: Some(session_id),
                    cookies: Some(cookies),
                    ..Ack::ok()
                },
                Err(e) => Ack::failed(&e),
            }),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let live = self.destroy_all();
        if live > 0 {
            debug!(live, "Engine dropped with live sessions");
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        format!(
            r#"{{"id":"","status":0,"target":"","headers":{{}},"body":{},"cookies":{{}},"usedProtocol":"","errorKind":"transport"}}"#,
            serde_json::Value::String(e.to_string())
        )
    })
}
