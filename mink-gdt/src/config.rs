//! Configuration protocol (§6 "Configuration protocol", §4.9 supplement).
//!
//! Only the wire-level protocol, commit log, and notification fan-out are in scope here — the
//! configuration daemon's CLI grammar and interactive shell are an explicit non-goal (§1).
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::asn1::tree::{NodeArena, NodeId, SessionId, Value};
use crate::asn1::{decode_root, encode_node, Complexity, DecodeError, Tag, UniversalTag};
use crate::service::{build_params_schema, read_params_from_schema, write_params_into_schema, ParameterMap, ParamsSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    Replicate,
    Get,
    Set,
    Result,
    Notify,
    AcRequest,
    AcResult,
}

#[derive(Debug, Clone)]
pub struct ConfigMessage {
    pub action: ConfigAction,
    pub path: String,
    pub params: ParameterMap,
    pub status: i32,
}

impl ConfigMessage {
    pub fn new(action: ConfigAction, path: impl Into<String>) -> ConfigMessage {
        ConfigMessage {
            action,
            path: path.into(),
            params: ParameterMap::new(),
            status: 0,
        }
    }
}

const ACTION_REPLICATE: i64 = 1;
const ACTION_GET: i64 = 2;
const ACTION_SET: i64 = 3;
const ACTION_RESULT: i64 = 4;
const ACTION_NOTIFY: i64 = 5;
const ACTION_AC_REQUEST: i64 = 6;
const ACTION_AC_RESULT: i64 = 7;

const TAG_ACTION: u32 = 0;
const TAG_PATH: u32 = 1;
const TAG_STATUS: u32 = 2;

const TOP_SESSION: SessionId = 1;

fn action_tag(action: ConfigAction) -> i64 {
    match action {
        ConfigAction::Replicate => ACTION_REPLICATE,
        ConfigAction::Get => ACTION_GET,
        ConfigAction::Set => ACTION_SET,
        ConfigAction::Result => ACTION_RESULT,
        ConfigAction::Notify => ACTION_NOTIFY,
        ConfigAction::AcRequest => ACTION_AC_REQUEST,
        ConfigAction::AcResult => ACTION_AC_RESULT,
    }
}

fn action_from_tag(tag: i64) -> Result<ConfigAction, DecodeError> {
    Ok(match tag {
        ACTION_REPLICATE => ConfigAction::Replicate,
        ACTION_GET => ConfigAction::Get,
        ACTION_SET => ConfigAction::Set,
        ACTION_RESULT => ConfigAction::Result,
        ACTION_NOTIFY => ConfigAction::Notify,
        ACTION_AC_REQUEST => ConfigAction::AcRequest,
        ACTION_AC_RESULT => ConfigAction::AcResult,
        _ => return Err(DecodeError::Malformed),
    })
}

struct ConfigSchema {
    root: NodeId,
    action: NodeId,
    path: NodeId,
    status: NodeId,
    params: ParamsSchema,
}

fn context_leaf(arena: &mut NodeArena, parent: NodeId, universal: UniversalTag, tag: u32) -> NodeId {
    let id = arena.add_leaf(Some(parent), universal, false);
    arena.set_tag_override(id, Tag::context(tag, Complexity::Primitive));
    id
}

fn build_schema() -> (NodeArena, ConfigSchema) {
    let mut arena = NodeArena::new();
    let root = arena.add_constructed(None, UniversalTag::Sequence, false);
    let action = context_leaf(&mut arena, root, UniversalTag::Integer, TAG_ACTION);
    let path = context_leaf(&mut arena, root, UniversalTag::OctetString, TAG_PATH);
    let status = context_leaf(&mut arena, root, UniversalTag::Integer, TAG_STATUS);
    let params = build_params_schema(&mut arena, Some(root), false);
    (arena, ConfigSchema { root, action, path, status, params })
}

pub fn encode(msg: &ConfigMessage, out: &mut Vec<u8>) {
    let (mut arena, schema) = build_schema();
    arena.set_overlay(schema.action, TOP_SESSION, Value::Integer(action_tag(msg.action)));
    arena.set_overlay(schema.path, TOP_SESSION, Value::OctetString(msg.path.as_bytes().to_vec()));
    arena.set_overlay(schema.status, TOP_SESSION, Value::Integer(msg.status as i64));
    write_params_into_schema(&mut arena, &schema.params, TOP_SESSION, &msg.params);
    arena.set_overlay_constructed(schema.root, TOP_SESSION);
    encode_node(&arena, schema.root, TOP_SESSION, out);
}

pub fn decode(buf: &[u8]) -> Result<ConfigMessage, DecodeError> {
    let (mut arena, schema) = build_schema();
    decode_root(&mut arena, schema.root, TOP_SESSION, buf)?;

    let action = match *arena.node(schema.action).value() {
        Value::Integer(n) => action_from_tag(n)?,
        _ => return Err(DecodeError::Malformed),
    };
    let path = match &*arena.node(schema.path).value() {
        Value::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => return Err(DecodeError::Malformed),
    };
    let status = match *arena.node(schema.status).value() {
        Value::Integer(n) => n as i32,
        _ => return Err(DecodeError::Malformed),
    };
    let params = read_params_from_schema(&arena, &schema.params, TOP_SESSION);

    Ok(ConfigMessage { action, path, params, status })
}

/// Append-only log of committed configuration transactions (§6 "Commit log").
///
/// Every commit is written to `<root>/<unix-nanos>.cfglog`; rollback reads files back in
/// timestamp order, most recent first, exactly as the directory naming already sorts them.
pub struct CommitLog {
    root: PathBuf,
}

impl CommitLog {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<CommitLog> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(CommitLog { root })
    }

    /// Append a commit at the given timestamp (unix nanoseconds), returning the file written.
    pub fn append(&self, unix_nanos: u128, path: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let file = self.root.join(format!("{}.cfglog", unix_nanos));
        let mut record = Vec::with_capacity(path.len() + 1 + contents.len());
        record.extend_from_slice(path.as_bytes());
        record.push(b'\n');
        record.extend_from_slice(contents);
        fs::write(&file, record)?;
        Ok(file)
    }

    /// List commit files most-recent-first, for rollback reads (§6).
    pub fn entries_most_recent_first(&self) -> io::Result<Vec<PathBuf>> {
        let mut files: Vec<(u128, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(stamp) = parse_stamp(&path) {
                files.push((stamp, path));
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }
}

fn parse_stamp(path: &Path) -> Option<u128> {
    path.file_stem()?.to_str()?.parse().ok()
}

/// A (user, path) notification subscription, fanned out on commit (§6, scenario 6 in §8).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub user: String,
    pub path: String,
}

/// Tracks which users are subscribed to which configuration sub-trees and resolves the fan-out
/// set for a commit.
///
/// Per the Open Question resolution (see DESIGN.md), writes are treated as single-writer under
/// the config lock; this registry only tracks read-side subscriptions.
#[derive(Default)]
pub struct NotifyRegistry {
    subscriptions: HashMap<String, Vec<String>>,
}

impl NotifyRegistry {
    pub fn new() -> NotifyRegistry {
        NotifyRegistry::default()
    }

    pub fn subscribe(&mut self, user: impl Into<String>, path: impl Into<String>) {
        self.subscriptions.entry(path.into()).or_default().push(user.into());
    }

    pub fn unsubscribe(&mut self, user: &str, path: &str) {
        if let Some(users) = self.subscriptions.get_mut(path) {
            users.retain(|u| u != user);
        }
    }

    /// Users subscribed to `committed_path` or any ancestor prefix of it, deduplicated. A
    /// commit to `system/log/level` notifies subscribers of `system/log` but not of an
    /// unrelated sibling like `system/network`.
    pub fn subscribers_for(&self, committed_path: &str) -> Vec<String> {
        let mut matched: Vec<String> = Vec::new();
        for (subscribed_path, users) in &self.subscriptions {
            if is_prefix_path(subscribed_path, committed_path) {
                for user in users {
                    if !matched.contains(user) {
                        matched.push(user.clone());
                    }
                }
            }
        }
        matched
    }
}

/// `prefix` matches `path` if `path` equals `prefix` or starts with `prefix` followed by `/`.
fn is_prefix_path(prefix: &str, path: &str) -> bool {
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ParamValue;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut msg = ConfigMessage::new(ConfigAction::Set, "system/log/level");
        msg.params.set(1, ParamValue::Utf8("debug".into()), 0, 0);
        msg.status = 0;

        let mut bytes = Vec::new();
        encode(&msg, &mut bytes);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.action, ConfigAction::Set);
        assert_eq!(decoded.path, "system/log/level");
        assert_eq!(decoded.params.get(1, 0), Some(&ParamValue::Utf8("debug".into())));
    }

    #[test]
    fn test_prefix_matching_excludes_siblings() {
        assert!(is_prefix_path("system/log", "system/log/level"));
        assert!(is_prefix_path("system/log", "system/log"));
        assert!(!is_prefix_path("system/log", "system/network"));
        assert!(!is_prefix_path("system/log", "system/logger"));
    }

    #[test]
    fn test_notify_fanout_scenario() {
        let mut registry = NotifyRegistry::new();
        registry.subscribe("u1", "system/log");
        registry.subscribe("u2", "system/log");

        let notified = registry.subscribers_for("system/log/level");
        assert_eq!(notified.len(), 2);
        assert!(notified.contains(&"u1".to_string()));
        assert!(notified.contains(&"u2".to_string()));

        let unrelated = registry.subscribers_for("system/network/mtu");
        assert!(unrelated.is_empty());
    }

    #[test]
    fn test_commit_log_roundtrip() {
        let dir = std::env::temp_dir().join(format!("mink-cfglog-test-{}", std::process::id()));
        let log = CommitLog::open(&dir).unwrap();

        log.append(100, "system/log", b"level=debug").unwrap();
        log.append(200, "system/log", b"level=info").unwrap();

        let entries = log.entries_most_recent_first().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].to_string_lossy().contains("200"));
        assert!(entries[1].to_string_lossy().contains("100"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
