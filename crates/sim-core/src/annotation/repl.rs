//! Line-oriented interactive mode.

use std::sync::Arc;

use mlua::{MultiValue, Value};
use tracing::{debug, info};

use super::bridge::SIMULATION_BRIDGE;
use super::{display_value, Sandbox, SandboxError};
use crate::io::Io;

/// Printed once when the REPL starts.
pub const REPL_BANNER: &str = "REPL start (call exit() to finish)";
/// Printed before each line is read.
pub const REPL_PROMPT: &str = "lua> ";
/// Printed when the session ends normally.
pub const REPL_STOPPED: &str = "REPL stopped";
/// Printed when a line fails and ends the session.
pub const REPL_FAILED: &str = "REPL stopped due to error";

const ATTACHED_NOTICE: &str = "Simulation running, REPL has access equal to annotations";
const DETACHED_NOTICE: &str = "Simulation not running, REPL running in its own engine";
const EXIT_BINDING: &str = "exit = function() stop = true end stop = false";
const SESSION_GLOBALS: [&str; 3] = ["print", "exit", "stop"];

/// Why a REPL session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplExit {
    /// A snippet called `exit()`.
    Exited,
    /// The input was closed or the read was cancelled.
    InputClosed,
    /// A snippet failed; state promoted by earlier lines is kept.
    Failed(SandboxError),
}

impl Sandbox {
    /// Reads, evaluates and echoes lines from `io` until the session ends.
    ///
    /// `print` writes through `io`. Each line is a separate [`Sandbox::exec`],
    /// so definitions carry over between lines. `print`, `exit` and `stop`
    /// are unbound again when the session ends.
    pub fn run_repl(&self, io: Arc<dyn Io>) -> ReplExit {
        io.print_string(&format!("{REPL_BANNER}\n"));
        let notice = if self.guard.is_bridge(SIMULATION_BRIDGE) {
            ATTACHED_NOTICE
        } else {
            DETACHED_NOTICE
        };
        io.print_string(&format!("{notice}\n"));

        let exit = self
            .bind_repl_globals(Arc::clone(&io))
            .map_or_else(ReplExit::Failed, |()| self.read_eval_loop(io.as_ref()));
        for name in SESSION_GLOBALS {
            if let Err(err) = self.persistent.raw_set(name, Value::Nil) {
                debug!(%err, name, "repl global not unbound");
            }
        }
        let trailer = if matches!(exit, ReplExit::Failed(_)) {
            REPL_FAILED
        } else {
            REPL_STOPPED
        };
        io.print_string(&format!("{trailer}\n"));
        exit
    }

    fn read_eval_loop(&self, io: &dyn Io) -> ReplExit {
        info!("repl started");
        loop {
            io.print_string(REPL_PROMPT);
            let Ok(line) = io.read_string() else {
                debug!("repl input closed");
                return ReplExit::InputClosed;
            };
            match self.exec(&line) {
                Ok(Value::Nil) => {}
                Ok(value) => io.print_string(&format!("{}\n", display_value(&value))),
                Err(err) => {
                    io.print_string(&format!("{err}\n"));
                    return ReplExit::Failed(err);
                }
            }
            if self.get_global::<bool>("stop").unwrap_or(false) {
                info!("repl exited");
                return ReplExit::Exited;
            }
        }
    }

    fn bind_repl_globals(&self, io: Arc<dyn Io>) -> Result<(), SandboxError> {
        let print = self.lua().create_function(move |_, args: MultiValue| {
            let line = args.iter().map(display_value).collect::<Vec<_>>().join("\t");
            io.print_string(&format!("{line}\n"));
            Ok(())
        })?;
        self.bind_global("print", print)?;
        self.exec(EXIT_BINDING).map(drop)
    }
}
