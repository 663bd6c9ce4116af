//! In-memory configuration tree plus the commit/notify plumbing described in §4.9/§6.
//!
//! Writes are single-writer under this store's lock (the Open Question resolution recorded in
//! `DESIGN.md`), so `Store` itself just needs one `Mutex` around a flat path -> `ParameterMap`
//! table; `NotifyRegistry`/`CommitLog` (mink_gdt::config) do the subscription and durability
//! bookkeeping.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use mink_gdt::config::{CommitLog, ConfigAction, ConfigMessage, NotifyRegistry};
use mink_gdt::service::ParameterMap;

pub struct Store {
    inner: Mutex<Inner>,
    commit_log: CommitLog,
}

struct Inner {
    tree: HashMap<String, ParameterMap>,
    notify: NotifyRegistry,
}

fn unix_nanos() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos()
}

impl Store {
    pub fn open(commit_log_root: impl Into<std::path::PathBuf>) -> std::io::Result<Store> {
        Ok(Store {
            inner: Mutex::new(Inner { tree: HashMap::new(), notify: NotifyRegistry::new() }),
            commit_log: CommitLog::open(commit_log_root)?,
        })
    }

    pub fn subscribe(&self, user: impl Into<String>, path: impl Into<String>) {
        self.inner.lock().unwrap().notify.subscribe(user, path);
    }

    /// Seed the tree at startup from `-c <contents-file>`, bypassing the commit log and notify
    /// fan-out — there are no peers registered yet to notify, and this isn't a wire-driven SET.
    pub fn seed(&self, path: impl Into<String>, params: ParameterMap) {
        self.inner.lock().unwrap().tree.insert(path.into(), params);
    }

    /// Apply `request` to the store, returning the reply to send back and the set of users to
    /// notify of the change (empty unless the action committed a new value).
    pub fn apply(&self, request: &ConfigMessage) -> (ConfigMessage, Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        match request.action {
            ConfigAction::Get => {
                let mut reply = ConfigMessage::new(ConfigAction::Result, request.path.clone());
                match inner.tree.get(&request.path) {
                    Some(params) => reply.params = params.clone(),
                    None => reply.status = 1,
                }
                (reply, Vec::new())
            }
            ConfigAction::Set | ConfigAction::Replicate => {
                inner.tree.insert(request.path.clone(), request.params.clone());
                drop(inner);

                let mut payload = Vec::new();
                mink_gdt::config::encode(request, &mut payload);
                let _ = self.commit_log.append(unix_nanos(), &request.path, &payload);

                let notified = self.inner.lock().unwrap().notify.subscribers_for(&request.path);
                let reply = ConfigMessage::new(ConfigAction::Result, request.path.clone());
                (reply, notified)
            }
            ConfigAction::AcRequest => {
                let mut reply = ConfigMessage::new(ConfigAction::AcResult, request.path.clone());
                reply.status = 0;
                (reply, Vec::new())
            }
            ConfigAction::Result | ConfigAction::Notify | ConfigAction::AcResult => {
                // These only ever arrive as replies to requests we issued; nothing to apply.
                (ConfigMessage::new(ConfigAction::Result, request.path.clone()), Vec::new())
            }
        }
    }
}
