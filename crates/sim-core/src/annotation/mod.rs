//! Annotation sandbox: an embedded Lua interpreter with capability gating.
//!
//! A sandbox lives in two phases. During bootstrap the fixed bridging API is
//! installed with access to the interpreter's host globals, each handed out
//! through a revocable wrapper. The sandbox then locks for the rest of its
//! lifetime and every wrapper stops working: snippets see only a fixed set of
//! read-only builtins, names they or earlier snippets defined, and bridge
//! objects bound by the host. Reaching any other host global, or touching a
//! bridge outside its declared members, raises [`SandboxViolation`].
//!
//! Bindings are two-tier. Each [`Sandbox::exec`] evaluates in a scratch
//! environment; after a successful evaluation every name the snippet defined
//! is promoted into the persistent table, then scratch is cleared. A failed
//! evaluation restores every table reachable from the persistent table to
//! its contents before the call.

mod bridge;
mod repl;

pub use bridge::install_simulation_bridge;
pub use repl::{ReplExit, REPL_BANNER, REPL_FAILED, REPL_PROMPT, REPL_STOPPED};

use std::collections::{BTreeSet, HashSet};
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mlua::{FromLua, Function, IntoLua, Lua, MultiValue, Table, Value};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::Register;

/// Globals a locked snippet may use.
pub const SAFE_BUILTINS: &[&str] = &[
    "assert",
    "error",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "select",
    "tonumber",
    "tostring",
    "type",
    "xpcall",
    "rawequal",
    "rawlen",
    "rawget",
    "setmetatable",
    "getmetatable",
    "math",
    "string",
    "table",
    "utf8",
    "coroutine",
];

const CHUNK_NAME: &str = "=annotation";
const PERSISTENT_KEY: &str = "sim.sandbox.persistent";
const BUILTINS_KEY: &str = "sim.sandbox.builtins";
const PROTECTED_METATABLE: &str = "locked";
const SCRUB_DEPTH: usize = 8;

/// A locked snippet reached a host capability that was not bridged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[error("sandbox violation: `{capability}` is not a bridged host capability")]
pub struct SandboxViolation {
    capability: String,
}

impl SandboxViolation {
    /// Violation naming the capability that was reached.
    #[must_use]
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }

    /// Name of the capability, e.g. `os` or `simulation.write_word`.
    #[must_use]
    pub fn capability(&self) -> &str {
        &self.capability
    }
}

/// Failure of a host-side sandbox call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    /// The snippet reached an un-bridged capability.
    #[error(transparent)]
    Violation(#[from] SandboxViolation),
    /// Compile or runtime error inside the snippet.
    #[error("script error: {0}")]
    Script(String),
    /// A persistent global could not be converted to the requested type.
    #[error("global `{name}` has the wrong type: {message}")]
    Type {
        /// Global name.
        name: String,
        /// Conversion error.
        message: String,
    },
    /// Installing the bridging API failed.
    #[error("sandbox bootstrap failed: {0}")]
    Bootstrap(String),
}

impl From<mlua::Error> for SandboxError {
    fn from(error: mlua::Error) -> Self {
        Self::Script(error.to_string())
    }
}

#[derive(Debug, Default)]
struct Guard {
    locked: AtomicBool,
    violation: Mutex<Option<SandboxViolation>>,
    bridges: Mutex<BTreeSet<String>>,
    revocable: Mutex<HashSet<usize>>,
}

impl Guard {
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Latches the first violation of the current evaluation.
    fn violate(&self, capability: impl Into<String>) -> mlua::Error {
        let violation = SandboxViolation::new(capability);
        warn!(capability = violation.capability(), "sandbox violation");
        self.violation.lock().get_or_insert_with(|| violation.clone());
        mlua::Error::external(violation)
    }

    fn take_violation(&self) -> Option<SandboxViolation> {
        self.violation.lock().take()
    }

    fn is_bridge(&self, name: &str) -> bool {
        self.bridges.lock().contains(name)
    }

    fn track_revocable(&self, value: &Value) {
        self.revocable.lock().insert(value.to_pointer() as usize);
    }
}

/// Contents of one table reachable from the persistent table.
struct TableImage {
    table: Table,
    entries: Vec<(Value, Value)>,
    metatable: Option<Table>,
}

/// Lua interpreter confined to safe builtins, promoted globals and bridges.
pub struct Sandbox {
    scratch: Table,
    persistent: Table,
    setmetatable: Function,
    guard: Arc<Guard>,
    lua: Lua,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("locked", &self.is_locked())
            .field("bridges", &*self.guard.bridges.lock())
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Sandbox with only the register API installed, already locked.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Bootstrap`] when the interpreter cannot be prepared.
    pub fn new() -> Result<Self, SandboxError> {
        Self::with_bootstrap(&[])
    }

    /// Runs the register API plus `scripts` with host access, then locks.
    ///
    /// Names the scripts define persist. Host globals the scripts reached are
    /// wrappers that fail with a violation once locked, and wrappers stored
    /// in persistent tables are removed by the lock.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Bootstrap`] when preparation or a bootstrap script fails.
    pub fn with_bootstrap(scripts: &[&str]) -> Result<Self, SandboxError> {
        let sandbox = Self::unlocked().map_err(|err| SandboxError::Bootstrap(err.to_string()))?;
        let register_api = register_api_script();
        for script in std::iter::once(register_api.as_str()).chain(scripts.iter().copied()) {
            sandbox
                .exec(script)
                .map_err(|err| SandboxError::Bootstrap(err.to_string()))?;
        }
        sandbox
            .lock()
            .map_err(|err| SandboxError::Bootstrap(err.to_string()))?;
        Ok(sandbox)
    }

    fn unlocked() -> mlua::Result<Self> {
        let lua = Lua::new();
        let globals = lua.globals();
        let guard = Arc::new(Guard::default());
        let builtins = lua.create_table()?;
        for name in SAFE_BUILTINS {
            let value = match globals.raw_get::<Value>(*name)? {
                Value::Table(library) => Value::Table(read_only_library(&lua, &guard, name, library)?),
                other => other,
            };
            builtins.raw_set(*name, value)?;
        }
        let persistent = lua.create_table()?;
        lua.set_named_registry_value(PERSISTENT_KEY, persistent.clone())?;
        lua.set_named_registry_value(BUILTINS_KEY, builtins)?;

        let getmetatable: Function = globals.raw_get("getmetatable")?;
        let string_meta: Table = getmetatable.call("")?;
        string_meta.raw_set("__metatable", PROTECTED_METATABLE)?;

        let setmetatable: Function = globals.raw_get("setmetatable")?;
        let scratch = lua.create_table()?;
        let meta = lua.create_table()?;

        let lookup = Arc::clone(&guard);
        meta.raw_set(
            "__index",
            lua.create_function(move |lua, (_, key): (Table, Value)| {
                resolve_global(lua, &lookup, &key)
            })?,
        )?;
        let assign = Arc::clone(&guard);
        meta.raw_set(
            "__newindex",
            lua.create_function(move |_, (scratch, key, value): (Table, Value, Value)| {
                if let Value::String(name) = &key {
                    let name = name.to_string_lossy();
                    if assign.is_bridge(&name) {
                        return Err(assign.violate(name));
                    }
                }
                scratch.raw_set(key, value)
            })?,
        )?;
        meta.raw_set("__metatable", PROTECTED_METATABLE)?;
        setmetatable.call::<Table>((scratch.clone(), meta))?;

        Ok(Self {
            scratch,
            persistent,
            setmetatable,
            guard,
            lua,
        })
    }

    /// True once bootstrap has finished. Never reverts.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.guard.is_locked()
    }

    /// Evaluates `code`, promotes the names it defined, then clears scratch.
    ///
    /// Returns the snippet's value (`nil` for statements).
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Violation`] when the snippet reached an
    /// un-bridged capability, even if the snippet caught the error itself,
    /// and [`SandboxError::Script`] for ordinary Lua errors. Nothing is
    /// promoted on failure, and tables already promoted keep their contents.
    pub fn exec(&self, code: &str) -> Result<Value, SandboxError> {
        self.guard.take_violation();
        let images = capture(&self.persistent)?;
        let result = self
            .lua
            .load(code)
            .set_name(CHUNK_NAME)
            .set_environment(self.scratch.clone())
            .eval::<Value>();
        let outcome = match (self.guard.take_violation(), result) {
            (Some(violation), _) => Err(SandboxError::Violation(violation)),
            (None, Err(err)) => Err(err.into()),
            (None, Ok(value)) => self.promote().map(|()| value).map_err(Into::into),
        };
        if outcome.is_err() {
            if let Err(err) = restore(images) {
                warn!(%err, "persistent state rollback failed");
            }
        }
        let cleared = self.clear_scratch();
        let value = outcome?;
        cleared?;
        Ok(value)
    }

    /// Binds `value` as a persistent global visible to every later snippet.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Script`] when the value cannot be converted.
    pub fn bind_global(&self, name: &str, value: impl IntoLua) -> Result<(), SandboxError> {
        self.persistent.raw_set(name, value)?;
        Ok(())
    }

    /// Reads a persistent global as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Type`] when the value does not convert to `T`.
    pub fn get_global<T: FromLua>(&self, name: &str) -> Result<T, SandboxError> {
        let value = self.persistent.raw_get::<Value>(name)?;
        T::from_lua(value, &self.lua).map_err(|err| SandboxError::Type {
            name: name.to_string(),
            message: err.to_string(),
        })
    }

    /// Binds a read-only bridge object named `name` exposing `members`.
    ///
    /// Reading a member not in `members`, writing any member, or assigning
    /// over the bridge name raises a violation.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Script`] when the proxy cannot be built.
    pub fn bind_bridge(&self, name: &str, members: Table) -> Result<(), SandboxError> {
        let lua = &self.lua;
        let proxy = lua.create_table()?;
        let meta = lua.create_table()?;

        let read_guard = Arc::clone(&self.guard);
        let bridge = name.to_string();
        meta.raw_set(
            "__index",
            lua.create_function(move |_, (_, key): (Table, Value)| {
                let member = members.raw_get::<Value>(key.clone())?;
                if member.is_nil() {
                    return Err(read_guard.violate(member_name(&bridge, &key)));
                }
                Ok(member)
            })?,
        )?;
        let write_guard = Arc::clone(&self.guard);
        let bridge = name.to_string();
        meta.raw_set(
            "__newindex",
            lua.create_function(move |_, (_, key, _): (Table, Value, Value)| {
                Err::<(), _>(write_guard.violate(member_name(&bridge, &key)))
            })?,
        )?;
        meta.raw_set("__metatable", PROTECTED_METATABLE)?;
        self.setmetatable.call::<Table>((proxy.clone(), meta))?;

        self.persistent.raw_set(name, proxy)?;
        self.guard.bridges.lock().insert(name.to_string());
        debug!(bridge = name, "bridge bound");
        Ok(())
    }

    /// Underlying interpreter, for building bridge members.
    #[must_use]
    pub const fn lua(&self) -> &Lua {
        &self.lua
    }

    fn promote(&self) -> mlua::Result<()> {
        for pair in self.scratch.pairs::<Value, Value>() {
            let (key, value) = pair?;
            if let Value::String(name) = &key {
                if self.guard.is_bridge(&name.to_string_lossy()) {
                    continue;
                }
            }
            self.persistent.raw_set(key, value)?;
        }
        Ok(())
    }

    fn clear_scratch(&self) -> mlua::Result<()> {
        let keys = self
            .scratch
            .pairs::<Value, Value>()
            .map(|pair| pair.map(|(key, _)| key))
            .collect::<mlua::Result<Vec<_>>>()?;
        for key in keys {
            self.scratch.raw_set(key, Value::Nil)?;
        }
        Ok(())
    }

    fn lock(&self) -> mlua::Result<()> {
        self.guard.locked.store(true, Ordering::Release);
        let revoked = self.guard.revocable.lock().clone();
        let mut visited = HashSet::new();
        scrub(&self.persistent, &revoked, &mut visited, SCRUB_DEPTH)?;
        debug!("sandbox locked");
        Ok(())
    }
}

/// Renders a value the way the REPL echoes it.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(flag) => flag.to_string(),
        Value::Integer(number) => number.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.to_string_lossy(),
        other => other.type_name().to_string(),
    }
}

fn resolve_global(lua: &Lua, guard: &Arc<Guard>, key: &Value) -> mlua::Result<Value> {
    let persistent: Table = lua.named_registry_value(PERSISTENT_KEY)?;
    let found = persistent.raw_get::<Value>(key.clone())?;
    if !found.is_nil() {
        return Ok(found);
    }
    let builtins: Table = lua.named_registry_value(BUILTINS_KEY)?;
    let found = builtins.raw_get::<Value>(key.clone())?;
    if !found.is_nil() {
        return Ok(found);
    }
    let host = lua.globals().raw_get::<Value>(key.clone())?;
    if host.is_nil() {
        return Ok(host);
    }
    if guard.is_locked() {
        return Err(guard.violate(display_value(key)));
    }
    revocable(lua, guard, display_value(key), host)
}

/// Wraps a host value handed to a bootstrap script.
///
/// Tables become proxies and functions become forwarders; both raise a
/// violation naming `name` once the sandbox is locked. Host handles
/// (userdata, threads) read as `nil`.
fn revocable(lua: &Lua, guard: &Arc<Guard>, name: String, value: Value) -> mlua::Result<Value> {
    let wrapped = match value {
        Value::Table(target) => Value::Table(revocable_table(lua, guard, name, target)?),
        Value::Function(target) => {
            let gate = Arc::clone(guard);
            Value::Function(lua.create_function(move |lua, args: MultiValue| {
                if gate.is_locked() {
                    return Err(gate.violate(name.as_str()));
                }
                target
                    .call::<MultiValue>(args)?
                    .into_iter()
                    .map(|result| revocable(lua, &gate, format!("{name}()"), result))
                    .collect::<mlua::Result<MultiValue>>()
            })?)
        }
        Value::UserData(_) | Value::LightUserData(_) | Value::Thread(_) => return Ok(Value::Nil),
        other => return Ok(other),
    };
    guard.track_revocable(&wrapped);
    Ok(wrapped)
}

fn revocable_table(lua: &Lua, guard: &Arc<Guard>, name: String, target: Table) -> mlua::Result<Table> {
    let proxy = lua.create_table()?;
    let meta = lua.create_table()?;

    let read_guard = Arc::clone(guard);
    let read_target = target.clone();
    let prefix = name.clone();
    meta.raw_set(
        "__index",
        lua.create_function(move |lua, (_, key): (Table, Value)| {
            let member = member_name(&prefix, &key);
            if read_guard.is_locked() {
                return Err(read_guard.violate(member));
            }
            revocable(lua, &read_guard, member, read_target.get::<Value>(key)?)
        })?,
    )?;
    let write_guard = Arc::clone(guard);
    meta.raw_set(
        "__newindex",
        lua.create_function(move |_, (_, key, value): (Table, Value, Value)| {
            if write_guard.is_locked() {
                return Err(write_guard.violate(member_name(&name, &key)));
            }
            target.set(key, value)
        })?,
    )?;
    meta.raw_set("__metatable", PROTECTED_METATABLE)?;
    protect(lua, &proxy, meta)?;
    Ok(proxy)
}

/// Read-only view of a builtin library; writes raise a violation.
fn read_only_library(lua: &Lua, guard: &Arc<Guard>, name: &str, library: Table) -> mlua::Result<Table> {
    let proxy = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.raw_set("__index", library.clone())?;

    let write_guard = Arc::clone(guard);
    let prefix = name.to_string();
    meta.raw_set(
        "__newindex",
        lua.create_function(move |_, (_, key, _): (Table, Value, Value)| {
            Err::<(), _>(write_guard.violate(member_name(&prefix, &key)))
        })?,
    )?;
    let next: Function = lua.globals().raw_get("next")?;
    meta.raw_set(
        "__pairs",
        lua.create_function(move |_, _: Table| Ok((next.clone(), library.clone(), Value::Nil)))?,
    )?;
    meta.raw_set("__metatable", PROTECTED_METATABLE)?;
    protect(lua, &proxy, meta)?;
    Ok(proxy)
}

fn protect(lua: &Lua, proxy: &Table, meta: Table) -> mlua::Result<()> {
    let setmetatable: Function = lua.globals().raw_get("setmetatable")?;
    setmetatable.call::<Table>((proxy.clone(), meta))?;
    Ok(())
}

/// Records every table reachable from `root` through keys and values.
fn capture(root: &Table) -> mlua::Result<Vec<TableImage>> {
    let mut visited = HashSet::new();
    let mut pending = vec![root.clone()];
    let mut images = Vec::new();
    while let Some(table) = pending.pop() {
        if !visited.insert(table.to_pointer()) {
            continue;
        }
        let entries = table
            .pairs::<Value, Value>()
            .collect::<mlua::Result<Vec<_>>>()?;
        for (key, value) in &entries {
            for item in [key, value] {
                if let Value::Table(nested) = item {
                    pending.push(nested.clone());
                }
            }
        }
        images.push(TableImage {
            metatable: table.metatable(),
            table,
            entries,
        });
    }
    Ok(images)
}

/// Puts every captured table back to its recorded contents, in place.
fn restore(images: Vec<TableImage>) -> mlua::Result<()> {
    for image in images {
        let current = image
            .table
            .pairs::<Value, Value>()
            .map(|pair| pair.map(|(key, _)| key))
            .collect::<mlua::Result<Vec<_>>>()?;
        for key in current {
            image.table.raw_set(key, Value::Nil)?;
        }
        for (key, value) in image.entries {
            image.table.raw_set(key, value)?;
        }
        let changed = image.table.metatable().map(|meta| meta.to_pointer())
            != image.metatable.as_ref().map(Table::to_pointer);
        if changed {
            image.table.set_metatable(image.metatable);
        }
    }
    Ok(())
}

fn member_name(bridge: &str, key: &Value) -> String {
    format!("{bridge}.{}", display_value(key))
}

fn scrub(
    table: &Table,
    revoked: &HashSet<usize>,
    visited: &mut HashSet<*const c_void>,
    depth: usize,
) -> mlua::Result<()> {
    if depth == 0 || !visited.insert(table.to_pointer()) {
        return Ok(());
    }
    let entries = table
        .pairs::<Value, Value>()
        .collect::<mlua::Result<Vec<_>>>()?;
    for (key, value) in entries {
        if revoked.contains(&(value.to_pointer() as usize)) {
            warn!(name = %display_value(&key), "scrubbed host capability staged during bootstrap");
            table.raw_set(key, Value::Nil)?;
        } else if let Value::Table(nested) = &value {
            scrub(nested, revoked, visited, depth - 1)?;
        }
    }
    Ok(())
}

fn register_api_script() -> String {
    let names = Register::ALL
        .iter()
        .map(|register| format!("\"{}\"", register.name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "reg = {{}}\n\
         for slot, name in ipairs({{ {names} }}) do\n\
         \x20 reg[name] = {{ id = slot - 1, get = function(self) return simulation.get_register(self.id) end }}\n\
         end"
    )
}
