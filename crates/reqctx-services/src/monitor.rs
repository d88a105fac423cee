//! Session monitor: process-wide record of login sessions and their latest activity.
//!
//! One [`Session`] is appended per successful login and is never removed by
//! logout; logout only flips it to `INACTIVE`. Removal happens solely through
//! [`SessionMonitor::evict_inactive`], governed by a [`RetentionPolicy`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use reqctx_protocol::{
    Activity, ActivityKind, ContextError, InboundRequest, Result, SessionState, User,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::activity_log::ActivityLog;
use crate::storage::SessionStorage;

/// Session attribute under which the transport keeps the monitor's session id.
pub const SESSION_ID_KEY: &str = "sessionId";

/// One login session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: u64,
    /// Host-assigned session identifier (cookie value).
    pub uid: String,
    pub user: Option<User>,
    pub login_timestamp: DateTime<Utc>,
    pub logout_timestamp: Option<DateTime<Utc>>,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<Activity>,
}

impl Session {
    pub fn new(id: u64, uid: impl Into<String>, user: Option<User>, login: DateTime<Utc>) -> Self {
        Self {
            id,
            uid: uid.into(),
            user,
            login_timestamp: login,
            logout_timestamp: None,
            state: SessionState::Active,
            last_activity: None,
        }
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.name.as_str())
    }

    pub fn last_activity_kind(&self) -> Option<ActivityKind> {
        self.last_activity.as_ref().map(|a| a.kind)
    }

    pub fn last_activity_start(&self) -> Option<DateTime<Utc>> {
        self.last_activity.as_ref().map(|a| a.start_timestamp)
    }

    pub fn last_activity_end(&self) -> Option<DateTime<Utc>> {
        self.last_activity.as_ref().map(|a| a.end_timestamp)
    }

    pub fn last_activity_text(&self) -> Option<&str> {
        self.last_activity.as_ref().and_then(|a| a.text.as_deref())
    }

    /// Time elapsed between the end of the last activity and `now`.
    pub fn inactive_since(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_activity_end().map(|end| now - end)
    }
}

/// Explicit eviction policy for the session list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Inactive sessions logged out longer ago than this are evicted.
    /// `None` keeps every session for the lifetime of the process.
    #[serde(default)]
    pub max_inactive_age_secs: Option<u64>,
}

impl RetentionPolicy {
    pub fn keep_all() -> Self {
        Self::default()
    }

    pub fn max_inactive_age(secs: u64) -> Self {
        Self {
            max_inactive_age_secs: Some(secs),
        }
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_inactive_age_secs.and_then(age_limit) else {
            return false;
        };
        if session.state != SessionState::Inactive {
            return false;
        }
        match session.logout_timestamp {
            Some(logout) => now - logout > max_age,
            None => false,
        }
    }
}

/// `secs` as a duration, or `None` when it does not fit. Callers treat `None`
/// as a limit that is never reached.
pub(crate) fn age_limit(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

struct MonitorState {
    sessions: Vec<Session>,
    next_id: u64,
    loaded: bool,
}

/// Registry of login sessions.
///
/// The list is loaded lazily from [`SessionStorage`] on first use and saved
/// back after every mutation. Ids come from a counter that only grows, so
/// they stay unique across eviction and restarts.
///
/// Mutations hold `save_lock` from the change through the write to storage,
/// so snapshots reach storage in the order they were taken.
pub struct SessionMonitor {
    state: RwLock<MonitorState>,
    save_lock: Mutex<()>,
    storage: Arc<dyn SessionStorage>,
    log: Arc<dyn ActivityLog>,
    retention: RetentionPolicy,
}

impl SessionMonitor {
    pub fn new(storage: Arc<dyn SessionStorage>, log: Arc<dyn ActivityLog>) -> Self {
        Self {
            state: RwLock::new(MonitorState {
                sessions: Vec::new(),
                next_id: 0,
                loaded: false,
            }),
            save_lock: Mutex::new(()),
            storage,
            log,
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Load persisted sessions if that has not happened yet.
    pub fn init(&self) {
        if self.state.read().loaded {
            return;
        }
        let mut state = self.state.write();
        if state.loaded {
            return;
        }
        match self.storage.load() {
            Ok(sessions) => {
                state.next_id = sessions.iter().map(|s| s.id + 1).max().unwrap_or(0);
                if !sessions.is_empty() {
                    info!("Restored {} sessions (next id {})", sessions.len(), state.next_id);
                }
                state.sessions = sessions;
            }
            Err(e) => warn!("Failed to load persisted sessions, starting empty: {e}"),
        }
        state.loaded = true;
    }

    /// Record a new login. Returns the session id.
    pub fn register(&self, uid: &str, user: Option<User>) -> u64 {
        self.init();
        let _saving = self.save_lock.lock();
        let (id, snapshot) = {
            let mut state = self.state.write();
            let id = state.next_id;
            state.next_id += 1;
            state.sessions.push(Session::new(id, uid, user, Utc::now()));
            (id, state.sessions.clone())
        };
        info!("Session {id} registered for {uid}");
        self.save(&snapshot);
        id
    }

    /// Record a logout: stamps the logout time and marks the session `INACTIVE`.
    pub fn unregister(&self, id: u64) -> Result<()> {
        self.init();
        let _saving = self.save_lock.lock();
        let snapshot = {
            let mut state = self.state.write();
            let session = state
                .sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(ContextError::SessionNotFound { id })?;
            session.logout_timestamp = Some(Utc::now());
            session.state = SessionState::Inactive;
            state.sessions.clone()
        };
        info!("Session {id} unregistered");
        self.save(&snapshot);
        Ok(())
    }

    /// Administrative state change. Accepts any state, including the reserved ones.
    pub fn set_state(&self, id: u64, new_state: SessionState) -> Result<()> {
        self.init();
        let _saving = self.save_lock.lock();
        let snapshot = {
            let mut state = self.state.write();
            let session = state
                .sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(ContextError::SessionNotFound { id })?;
            debug!("Session {id}: {} -> {new_state}", session.state);
            session.state = new_state;
            state.sessions.clone()
        };
        self.save(&snapshot);
        Ok(())
    }

    /// Record an action performed in a session. Never fails; sink errors are logged.
    pub fn log_activity(&self, session_id: u64, action: &str, user: Option<User>) -> Activity {
        let now = Utc::now();
        let activity = Activity {
            session_id,
            kind: ActivityKind::Activity,
            name: user.as_ref().map(|u| {
                format!("User: {}, Action: {action}, Date: {}", u.name, now.to_rfc3339())
            }),
            start_timestamp: now,
            end_timestamp: now,
            text: None,
            user,
        };
        self.record(activity)
    }

    /// Record a page request, capturing its parameters and remote address.
    pub fn log_page_request(
        &self,
        session_id: u64,
        action: &str,
        user: Option<User>,
        request: Option<&dyn InboundRequest>,
    ) -> Activity {
        let t0 = Instant::now();
        let now = Utc::now();

        let activity = Activity {
            session_id,
            kind: ActivityKind::PageRequest,
            name: Some(format!("{action}, Date: {}", now.to_rfc3339())),
            start_timestamp: now,
            end_timestamp: now,
            text: Some(page_request_text(request)),
            user,
        };
        let activity = self.record(activity);

        debug!("Logging of page request took {} ms", t0.elapsed().as_millis());
        activity
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.init();
        self.state.read().sessions.clone()
    }

    pub fn session(&self, id: u64) -> Option<Session> {
        self.init();
        self.state.read().sessions.iter().find(|s| s.id == id).cloned()
    }

    pub fn find_by_uid(&self, uid: &str) -> Option<u64> {
        self.init();
        self.state
            .read()
            .sessions
            .iter()
            .find(|s| s.uid == uid)
            .map(|s| s.id)
    }

    /// Id of the first session registered under `uid`, or `-1` if there is none.
    pub fn session_by_uid(&self, uid: &str) -> i64 {
        self.find_by_uid(uid).map(|id| id as i64).unwrap_or(-1)
    }

    pub fn len(&self) -> usize {
        self.init();
        self.state.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sessions the retention policy considers expired. Returns how many were removed.
    pub fn evict_inactive(&self, now: DateTime<Utc>) -> usize {
        self.init();
        let _saving = self.save_lock.lock();
        let (removed, snapshot) = {
            let mut state = self.state.write();
            let before = state.sessions.len();
            state.sessions.retain(|s| !self.retention.is_expired(s, now));
            (before - state.sessions.len(), state.sessions.clone())
        };
        if removed > 0 {
            info!("Evicted {removed} inactive sessions");
            self.save(&snapshot);
        }
        removed
    }

    /// Save the current list. Used at shutdown.
    pub fn persist(&self) -> Result<()> {
        let _saving = self.save_lock.lock();
        let snapshot = self.state.read().sessions.clone();
        self.storage.save(&snapshot)
    }

    fn record(&self, activity: Activity) -> Activity {
        {
            let mut state = self.state.write();
            match state.sessions.iter_mut().find(|s| s.id == activity.session_id) {
                Some(session) => session.last_activity = Some(activity.clone()),
                None => warn!(
                    "Activity for unknown session {}; not cached",
                    activity.session_id
                ),
            }
        }
        if let Err(e) = self.log.append(&activity) {
            warn!("Failed to write activity for session {}: {e}", activity.session_id);
        }
        activity
    }

    fn save(&self, snapshot: &[Session]) {
        if let Err(e) = self.storage.save(snapshot) {
            warn!("Failed to persist sessions: {e}");
        }
    }
}

fn page_request_text(request: Option<&dyn InboundRequest>) -> String {
    let mut fields = Map::new();
    if let Some(request) = request {
        for (key, value) in request.parameters() {
            fields.entry(key).or_insert(Value::String(value));
        }
        fields.insert("uri".into(), Value::String(request.uri().to_string()));
        fields.insert(
            "remoteAddress".into(),
            request.remote_addr().map(Value::String).unwrap_or(Value::Null),
        );
        fields.insert(
            "remoteHost".into(),
            request.remote_host().map(Value::String).unwrap_or(Value::Null),
        );
    }
    Value::Object(fields).to_string()
}
