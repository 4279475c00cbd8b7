// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Relay settings.
//
// Tunables live in an external key/value store with a machine-wide and a
// per-user scope. Every key is optional: a missing value falls back to the
// documented default and is never fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{BAD_PIPE_CODE, EventId};

/// Marker template (three `%s` slots: name, parameter, job id).
pub const KEY_MARKER_TEMPLATE: &str = "DSCCommandCStylePattern";
/// Command name used for the set-parameter-id marker.
pub const KEY_SET_PARAM_COMMAND: &str = "DSCCommandSetParamId";
/// Vendor prefix every marker line starts with.
pub const KEY_MARKER_PREFIX: &str = "DSCPrefix";
/// Base path of the debug capture file.
pub const KEY_CAPTURE_PATH: &str = "LPDriverPSDebugFile";
/// Executable of the relay consumer.
pub const KEY_CONSUMER_PATH: &str = "LPSpoolerPath";
/// Seconds to keep trying to reach the consumer's channel.
pub const KEY_CONNECT_TIMEOUT: &str = "ConnectTimeout";
/// Size of the pad block emitted after the set-parameter-id marker.
pub const KEY_PAD_CHAR_COUNT: &str = "PadCommentCharCount";
/// Structural event that is forced to fail.
pub const KEY_INJECT_TO_FAIL: &str = "PSInjectToFail";
/// Error code reported by the forced failure.
pub const KEY_INJECT_TO_FAIL_CODE: &str = "PSInjectToFailErrorCode";
/// Whether the consumer gets a visible console.
pub const KEY_SHOW_CONSOLE: &str = "ShowConsoleWindows";

pub const DEFAULT_MARKER_TEMPLATE: &str = "%%UCSLogoPrint %s(%s) [%s]";
/// Number of `%s` slots every marker template carries.
pub const TEMPLATE_SLOTS: usize = 3;
pub const DEFAULT_SET_PARAM_COMMAND: &str = "SetParameterId";
pub const DEFAULT_MARKER_PREFIX: &str = "%%UCSLogoPrint ";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Pad blocks must stay strictly below this many bytes.
pub const MAX_PAD_CHARS: usize = 8192;

/// Which half of the settings store a key is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingsScope {
    /// Machine-wide settings, written by the installer.
    Machine,
    /// Settings of the user running the job.
    User,
}

/// Read-only key/value source for tunables.
pub trait SettingsStore: Send + Sync {
    /// Fetch a string value, `None` when the key is absent.
    fn get_string(&self, scope: SettingsScope, key: &str) -> Option<String>;

    /// Fetch an integer value, `None` when absent or not an integer.
    fn read_int(&self, scope: SettingsScope, key: &str) -> Option<u32>;

    /// Fetch an integer value or fall back to `default`.
    fn get_int(&self, scope: SettingsScope, key: &str, default: u32) -> u32 {
        self.read_int(scope, key).unwrap_or(default)
    }
}

/// Settings kept in memory. Mostly useful in tests and for the CLI's
/// command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    values: HashMap<(SettingsScope, String), Value>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, scope: SettingsScope, key: &str, value: &str) -> Self {
        self.values
            .insert((scope, key.to_owned()), Value::String(value.to_owned()));
        self
    }

    pub fn with_int(mut self, scope: SettingsScope, key: &str, value: u32) -> Self {
        self.values.insert((scope, key.to_owned()), Value::from(value));
        self
    }
}

impl SettingsStore for MemorySettings {
    fn get_string(&self, scope: SettingsScope, key: &str) -> Option<String> {
        self.values
            .get(&(scope, key.to_owned()))
            .and_then(value_as_string)
    }

    fn read_int(&self, scope: SettingsScope, key: &str) -> Option<u32> {
        self.values
            .get(&(scope, key.to_owned()))
            .and_then(value_as_u32)
    }
}

/// Settings loaded from one JSON object per scope.
///
/// A missing file is treated as an empty scope; a file that exists but is
/// not a JSON object is an error.
#[derive(Debug, Clone, Default)]
pub struct JsonSettingsStore {
    machine: serde_json::Map<String, Value>,
    user: serde_json::Map<String, Value>,
}

impl JsonSettingsStore {
    pub fn open(machine: impl AsRef<Path>, user: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            machine: read_scope_file(machine.as_ref())?,
            user: read_scope_file(user.as_ref())?,
        })
    }

    /// Open the store at the conventional locations (see [`SettingsPaths`]).
    pub fn open_default() -> Result<Self> {
        let paths = SettingsPaths::discover();
        Self::open(&paths.machine, &paths.user)
    }

    fn scope(&self, scope: SettingsScope) -> &serde_json::Map<String, Value> {
        match scope {
            SettingsScope::Machine => &self.machine,
            SettingsScope::User => &self.user,
        }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get_string(&self, scope: SettingsScope, key: &str) -> Option<String> {
        self.scope(scope).get(key).and_then(value_as_string)
    }

    fn read_int(&self, scope: SettingsScope, key: &str) -> Option<u32> {
        self.scope(scope).get(key).and_then(value_as_u32)
    }
}

fn read_scope_file(path: &Path) -> Result<serde_json::Map<String, Value>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "settings file absent, scope is empty");
            return Ok(serde_json::Map::new());
        }
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str::<Value>(&data)? {
        Value::Object(map) => Ok(map),
        _ => Err(crate::RelayError::Settings(format!(
            "{} is not a JSON object",
            path.display()
        ))),
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(u32::from(*b)),
        _ => None,
    }
}

/// Conventional locations of the two settings files.
#[derive(Debug, Clone)]
pub struct SettingsPaths {
    pub machine: PathBuf,
    pub user: PathBuf,
}

impl SettingsPaths {
    pub fn discover() -> Self {
        Self {
            machine: machine_settings_dir().join("settings.json"),
            user: user_settings_dir().join("settings.json"),
        }
    }
}

fn machine_settings_dir() -> PathBuf {
    if cfg!(windows) {
        if let Ok(program_data) = std::env::var("ProgramData") {
            return PathBuf::from(program_data).join("psrelay");
        }
    }
    PathBuf::from("/etc/psrelay")
}

fn user_settings_dir() -> PathBuf {
    // Try XDG config dir, then fallback to home
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("psrelay");
    }
    if let Ok(appdata) = std::env::var("APPDATA") {
        return PathBuf::from(appdata).join("psrelay");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("psrelay");
    }
    // Last resort
    std::env::temp_dir().join("psrelay")
}

/// Tunables of one job, resolved from a [`SettingsStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Marker template with three `%s` slots: name, parameter, job id.
    pub marker_template: String,
    /// Command name of the set-parameter-id marker.
    pub set_param_command: String,
    /// Vendor prefix of marker lines (used for the pad block).
    pub marker_prefix: String,
    /// Base path of the debug capture file, capture disabled when `None`.
    pub capture_path: Option<PathBuf>,
    /// Relay consumer executable, relay disabled when `None`.
    pub consumer_path: Option<PathBuf>,
    /// Seconds to keep trying to reach the consumer's channel.
    pub connect_timeout_secs: u64,
    /// Size of the pad block (test hook), 0 when disabled.
    pub pad_char_count: usize,
    /// Structural event forced to fail (test hook).
    pub inject_to_fail: Option<EventId>,
    /// Code reported by the forced failure.
    pub inject_to_fail_code: u32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            marker_template: DEFAULT_MARKER_TEMPLATE.into(),
            set_param_command: DEFAULT_SET_PARAM_COMMAND.into(),
            marker_prefix: DEFAULT_MARKER_PREFIX.into(),
            capture_path: None,
            consumer_path: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            pad_char_count: 0,
            inject_to_fail: None,
            inject_to_fail_code: BAD_PIPE_CODE,
        }
    }
}

impl RelaySettings {
    /// Resolve all tunables from `store`.
    ///
    /// Each key is fetched on its own blocking task; the fetches are
    /// independent and side-effect free, so they run concurrently and are
    /// joined before the job proceeds.
    pub async fn load(store: Arc<dyn SettingsStore>) -> Self {
        use SettingsScope::{Machine, User};

        let template = fetch_string(&store, Machine, KEY_MARKER_TEMPLATE);
        let set_param = fetch_string(&store, Machine, KEY_SET_PARAM_COMMAND);
        let prefix = fetch_string(&store, Machine, KEY_MARKER_PREFIX);
        let capture_user = fetch_string(&store, User, KEY_CAPTURE_PATH);
        let capture_machine = fetch_string(&store, Machine, KEY_CAPTURE_PATH);
        let consumer = fetch_string(&store, Machine, KEY_CONSUMER_PATH);
        let timeout_user = fetch_int(&store, User, KEY_CONNECT_TIMEOUT, 0);
        let timeout_machine = fetch_int(&store, Machine, KEY_CONNECT_TIMEOUT, 0);
        let pad = fetch_int(&store, User, KEY_PAD_CHAR_COUNT, 0);
        let fail = fetch_int(&store, User, KEY_INJECT_TO_FAIL, 0);
        let fail_code = fetch_int(&store, User, KEY_INJECT_TO_FAIL_CODE, BAD_PIPE_CODE);

        let (
            template,
            set_param,
            prefix,
            capture_user,
            capture_machine,
            consumer,
            timeout_user,
            timeout_machine,
            pad,
            fail,
            fail_code,
        ) = tokio::join!(
            template,
            set_param,
            prefix,
            capture_user,
            capture_machine,
            consumer,
            timeout_user,
            timeout_machine,
            pad,
            fail,
            fail_code
        );

        let defaults = Self::default();
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

        let connect_timeout_secs = [timeout_user, timeout_machine]
            .into_iter()
            .flatten()
            .find(|secs| *secs > 0)
            .map(u64::from)
            .unwrap_or(defaults.connect_timeout_secs);

        let pad_char_count = pad
            .map(|n| n as usize)
            .filter(|n| *n > 0 && *n < MAX_PAD_CHARS)
            .unwrap_or(0);

        let inject_to_fail = fail.filter(|id| *id > 0).map(EventId);

        let marker_template = match non_empty(template.flatten()) {
            Some(t) if has_template_slots(&t) => t,
            Some(t) => {
                warn!(
                    template = %t,
                    slots = TEMPLATE_SLOTS,
                    "marker template has the wrong number of %s slots, using default"
                );
                defaults.marker_template
            }
            None => defaults.marker_template,
        };

        let settings = Self {
            marker_template,
            set_param_command: non_empty(set_param.flatten())
                .unwrap_or(defaults.set_param_command),
            marker_prefix: non_empty(prefix.flatten()).unwrap_or(defaults.marker_prefix),
            capture_path: non_empty(capture_user.flatten())
                .or_else(|| non_empty(capture_machine.flatten()))
                .map(PathBuf::from),
            consumer_path: non_empty(consumer.flatten()).map(PathBuf::from),
            connect_timeout_secs,
            pad_char_count,
            inject_to_fail,
            inject_to_fail_code: if inject_to_fail.is_some() {
                fail_code.unwrap_or(BAD_PIPE_CODE)
            } else {
                BAD_PIPE_CODE
            },
        };
        debug!(?settings, "relay settings resolved");
        settings
    }
}

/// Whether `template` has one `%s` slot each for name, parameter and job id.
pub fn has_template_slots(template: &str) -> bool {
    template.matches("%s").count() == TEMPLATE_SLOTS
}

/// Fetch a string on a blocking task. Returns `None` if the task itself dies.
async fn fetch_string(
    store: &Arc<dyn SettingsStore>,
    scope: SettingsScope,
    key: &'static str,
) -> Option<Option<String>> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.get_string(scope, key))
        .await
        .map_err(|e| warn!(key, error = %e, "settings fetch failed, using default"))
        .ok()
}

/// Fetch an integer on a blocking task. Returns `None` if the task itself dies.
async fn fetch_int(
    store: &Arc<dyn SettingsStore>,
    scope: SettingsScope,
    key: &'static str,
    default: u32,
) -> Option<u32> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.get_int(scope, key, default))
        .await
        .map_err(|e| warn!(key, error = %e, "settings fetch failed, using default"))
        .ok()
}

/// Process-wide "show the consumer's console" flag.
///
/// Read from the store once and cached until [`ShowConsoleCache::invalidate`]
/// is called. The cache is passed to whoever launches consumers instead of
/// living in a global, so tests can reset it.
#[derive(Debug, Default)]
pub struct ShowConsoleCache {
    cached: Mutex<Option<bool>>,
}

impl ShowConsoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value, initialised from `store` on first use.
    pub fn get(&self, store: &dyn SettingsStore) -> bool {
        if let Ok(mut cached) = self.cached.lock() {
            if let Some(show) = *cached {
                return show;
            }
            let show = store.get_int(SettingsScope::User, KEY_SHOW_CONSOLE, 0) != 0;
            debug!(show, "console visibility initialised");
            *cached = Some(show);
            show
        } else {
            false
        }
    }

    /// Forget the cached value; the next `get` reads the store again.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.cached.lock().map(|c| c.is_some()).unwrap_or(false)
    }
}
