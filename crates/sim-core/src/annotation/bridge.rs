//! The `simulation` bridge: read-only access to machine state from annotations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mlua::Value;

use super::{Sandbox, SandboxError};
use crate::memory::AccessWidth;
use crate::{Address, MachineState, Register, Word};

/// Bridge name visible to snippets.
pub const SIMULATION_BRIDGE: &str = "simulation";

/// Binds `simulation` with `get_register`, `get_pc`, `read_word`,
/// `read_byte` and `is_running`.
///
/// Registers are addressed by number or by name (`"t0"`, `"$sp"`).
/// Reads that fault raise an ordinary script error.
///
/// # Errors
///
/// Returns [`SandboxError::Script`] when the bridge functions cannot be created.
pub fn install_simulation_bridge(
    sandbox: &Sandbox,
    machine: Arc<MachineState>,
    running: Arc<AtomicBool>,
) -> Result<(), SandboxError> {
    let lua = sandbox.lua();
    let members = lua.create_table()?;

    let registers = Arc::clone(&machine);
    members.raw_set(
        "get_register",
        lua.create_function(move |_, selector: Value| {
            let register = select_register(&selector)?;
            Ok(i64::from(registers.registers().get(register).as_signed()))
        })?,
    )?;

    let pc = Arc::clone(&machine);
    members.raw_set(
        "get_pc",
        lua.create_function(move |_, ()| Ok(i64::from(pc.program_counter().value())))?,
    )?;

    let words = Arc::clone(&machine);
    members.raw_set(
        "read_word",
        lua.create_function(move |_, address: i64| {
            read(&words, address, AccessWidth::Word).map(|word| i64::from(word.as_signed()))
        })?,
    )?;

    let bytes = machine;
    members.raw_set(
        "read_byte",
        lua.create_function(move |_, address: i64| {
            read(&bytes, address, AccessWidth::Byte).map(|byte| i64::from(byte.as_unsigned()))
        })?,
    )?;

    members.raw_set(
        "is_running",
        lua.create_function(move |_, ()| Ok(running.load(Ordering::Acquire)))?,
    )?;

    sandbox.bind_bridge(SIMULATION_BRIDGE, members)
}

fn select_register(selector: &Value) -> mlua::Result<Register> {
    let register = match selector {
        Value::Integer(id) => u8::try_from(*id).ok().and_then(Register::from_id),
        Value::String(name) => Register::from_name(&name.to_string_lossy()),
        _ => None,
    };
    register.ok_or_else(|| {
        mlua::Error::RuntimeError(format!(
            "unknown register {}",
            super::display_value(selector)
        ))
    })
}

fn read(machine: &MachineState, address: i64, width: AccessWidth) -> mlua::Result<Word> {
    let address = u32::try_from(address).map(Address::new).map_err(|_| {
        mlua::Error::RuntimeError(format!("address {address} is outside the address space"))
    })?;
    machine
        .read(address, width)
        .map_err(|fault| mlua::Error::RuntimeError(fault.to_string()))
}
