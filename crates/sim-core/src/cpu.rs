//! Cycle runner: owns the PC and instruction register and drives
//! fetch, decode, execute and annotation dispatch at clock cadence.
//!
//! The run loop lives on one simulation thread. Control calls (`pause`,
//! `resume`, `step`, `stop_running`) come from any other thread and only
//! ever take effect at cycle or tick boundaries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::annotation::{install_simulation_bridge, Sandbox, SandboxError};
use crate::api::{ControlError, CpuSnapshot, SimConfig};
use crate::clock::Clock;
use crate::decoder::Decoder;
use crate::execute::{next_sequential, ExecuteOutcome, Executor};
use crate::io::Io;
use crate::listener::{ListenerBus, SimulationListener};
use crate::memory::{AccessWidth, MainMemory};
use crate::message::{Message, SimulationDetail, Stage};
use crate::{
    Address, Annotation, CpuPhase, ExecuteFault, Fault, MachineState, Program, Register, Statement,
    Word,
};

/// Problem text for a program that ran past its last statement.
pub const FELL_OFF_END: &str = "program ran past the end of the text segment; \
                                exit with the `exit` instruction or syscall 10";

/// How one cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleOutcome {
    /// The PC points at the next statement.
    Continued,
    /// The program requested a clean exit.
    Exited {
        /// Exit code, when supplied.
        code: Option<i32>,
    },
    /// The PC moved one statement past the end of the text segment.
    FellOffEnd,
}

/// The simulated processor.
pub struct Cpu {
    config: Mutex<SimConfig>,
    bus: Arc<ListenerBus>,
    io: Arc<dyn Io>,
    clock: Clock,
    machine: Arc<MachineState>,
    instruction_register: Mutex<Option<Statement>>,
    program: RwLock<Option<Arc<Program>>>,
    sandbox: Mutex<Option<Sandbox>>,
    annotations_enabled: AtomicBool,
    phase: Mutex<CpuPhase>,
    running: Arc<AtomicBool>,
    pauses: AtomicU64,
    stop_reported: AtomicBool,
    pipeline: Mutex<[Option<Address>; 3]>,
    exit_code: Mutex<Option<i32>>,
}

impl Cpu {
    /// Idle CPU using `io` for console syscalls.
    #[must_use]
    pub fn new(io: Arc<dyn Io>, config: SimConfig) -> Self {
        Self {
            clock: Clock::new(config.cycle_period()),
            annotations_enabled: AtomicBool::new(config.annotations_enabled),
            config: Mutex::new(config),
            bus: Arc::new(ListenerBus::new()),
            io,
            machine: Arc::new(MachineState::new()),
            instruction_register: Mutex::new(None),
            program: RwLock::new(None),
            sandbox: Mutex::new(None),
            phase: Mutex::new(CpuPhase::Idle),
            running: Arc::new(AtomicBool::new(false)),
            pauses: AtomicU64::new(0),
            stop_reported: AtomicBool::new(false),
            pipeline: Mutex::new([None; 3]),
            exit_code: Mutex::new(None),
        }
    }

    /// Adds a listener for every later message.
    pub fn register_listener(&self, listener: Arc<dyn SimulationListener>) {
        self.bus.register(listener);
    }

    /// Removes a listener. Returns false when it was not registered.
    pub fn unregister_listener(&self, listener: &Arc<dyn SimulationListener>) -> bool {
        self.bus.unregister(listener)
    }

    /// The message bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<ListenerBus> {
        &self.bus
    }

    /// Installs the `simulation` bridge into `sandbox` and uses it for annotations.
    ///
    /// # Errors
    ///
    /// Returns the bridge installation error; the previous sandbox stays attached.
    pub fn attach_sandbox(&self, sandbox: Sandbox) -> Result<(), SandboxError> {
        install_simulation_bridge(&sandbox, Arc::clone(&self.machine), Arc::clone(&self.running))?;
        *self.sandbox.lock() = Some(sandbox);
        Ok(())
    }

    /// Runs `f` against the attached sandbox.
    pub fn with_sandbox<R>(&self, f: impl FnOnce(&Sandbox) -> R) -> Option<R> {
        self.sandbox.lock().as_ref().map(f)
    }

    /// Loads `program`: fresh memory, registers cleared then `$gp`/`$sp`
    /// seeded, PC at the `main` label (any case).
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Running`] during a run, and
    /// [`Fault::NoEntryPoint`] when there is no `main` label. A failed load
    /// leaves the previous program, memory and registers untouched.
    pub fn load_program(&self, program: Arc<Program>) -> Result<(), ControlError> {
        let mut phase = self.phase.lock();
        if phase.is_active() {
            return Err(ControlError::Running);
        }
        let Some(entry) = program.entry_point() else {
            drop(phase);
            warn!("load rejected: no entry point");
            self.bus.send(&Message::Problem {
                message: Fault::NoEntryPoint.to_string(),
                fault: Some(Fault::NoEntryPoint),
            });
            return Err(Fault::NoEntryPoint.into());
        };

        let registers = self.machine.registers();
        registers.reset();
        registers.set(Register::Gp, Word::from_unsigned(program.initial_gp.value()));
        registers.set(Register::Sp, Word::from_unsigned(program.initial_sp.value()));
        let limits = self.config.lock().memory_limits();
        *self.machine.memory().write() = MainMemory::new(Arc::clone(&program), limits);
        self.machine.set_program_counter(entry);
        *self.instruction_register.lock() = None;
        *self.pipeline.lock() = [None; 3];
        *self.exit_code.lock() = None;
        let statements = program.text_segment.len();
        *self.program.write() = Some(program);
        *phase = CpuPhase::Loaded;
        drop(phase);

        for register in Register::ALL {
            self.bus.send(&Message::RegisterChanged {
                register,
                value: registers.get(register),
            });
        }
        self.bus
            .send(&Message::Simulation(SimulationDetail::ProgramLoaded));
        info!(%entry, statements, "program loaded");
        Ok(())
    }

    /// Runs one fetch-decode-execute cycle plus annotation dispatch.
    ///
    /// # Errors
    ///
    /// Returns the first fault raised; the PC may already have advanced past
    /// the faulting statement.
    ///
    /// A console read cancelled by [`Cpu::pause`] is re-issued inside the
    /// same cycle once the clock is resumed or stepped. When the run is
    /// stopped instead, the PC is left on the `syscall`.
    pub fn run_single_cycle(&self) -> Result<CycleOutcome, Fault> {
        let program = self.program.read().clone().ok_or(Fault::NoProgramLoaded)?;
        let pc = self.machine.program_counter();

        self.bus.send(&Message::StageEnter(Stage::Fetch));
        let statement = self.machine.memory().read().fetch_statement(pc)?.clone();
        *self.instruction_register.lock() = Some(statement.clone());
        debug!(%pc, %statement, "fetched");
        self.bus.send(&Message::DataMovement {
            address: pc,
            statement: statement.clone(),
        });
        let sequential = next_sequential(pc)?;
        self.machine.set_program_counter(sequential);
        self.bus.send(&Message::ExecuteStatement { address: pc });
        if self.config.lock().pipelined {
            self.advance_pipeline(pc);
        }

        self.bus.send(&Message::StageEnter(Stage::Decode));
        let form = Decoder::decode(statement.instruction, &statement.operands)?;

        self.bus.send(&Message::StageEnter(Stage::Execute));
        let executor = Executor::new(&self.machine, self.io.as_ref(), &self.bus);
        let outcome = loop {
            let pauses = self.pauses.load(Ordering::Acquire);
            match executor.execute(&form, pc)? {
                ExecuteOutcome::Continue { next_pc } => {
                    self.machine.set_program_counter(next_pc);
                    break CycleOutcome::Continued;
                }
                ExecuteOutcome::Exit { code } => {
                    self.running.store(false, Ordering::Release);
                    *self.exit_code.lock() = Some(code.unwrap_or(0));
                    info!(%pc, ?code, "program exited");
                    break CycleOutcome::Exited { code };
                }
                ExecuteOutcome::ReadCancelled => {
                    if !self.is_running() || self.clock.wait_until_released().is_err() {
                        self.machine.set_program_counter(pc);
                        debug!(%pc, "read abandoned by stop");
                        return Ok(CycleOutcome::Continued);
                    }
                    if self.pauses.load(Ordering::Acquire) == pauses {
                        return Err(ExecuteFault::InputClosed.into());
                    }
                    debug!(%pc, "re-issuing cancelled read");
                }
            }
        };

        if let Some(annotation) = program.annotations.get(&pc) {
            self.dispatch_annotation(annotation, Some(pc))?;
        }

        if outcome == CycleOutcome::Continued
            && program.text_segment_end() == Some(self.machine.program_counter())
        {
            self.running.store(false, Ordering::Release);
            warn!(pc = %self.machine.program_counter(), "program fell off the end of the text segment");
            self.bus.send(&Message::problem(FELL_OFF_END));
            return Ok(CycleOutcome::FellOffEnd);
        }
        Ok(outcome)
    }

    /// Runs the loaded program on the calling thread until it stops.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Running`] when a run is active and
    /// [`ControlError::NotLoaded`] before the first load. Faults during the
    /// run are reported as problem messages, not returned.
    pub fn run_program(&self) -> Result<(), ControlError> {
        self.begin_run()?;
        self.drive();
        Ok(())
    }

    /// Runs the loaded program on a new thread named `simulation`.
    ///
    /// # Errors
    ///
    /// As [`Cpu::run_program`], plus [`ControlError::Spawn`].
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, ControlError> {
        self.begin_run()?;
        let cpu = Arc::clone(self);
        thread::Builder::new()
            .name("simulation".to_string())
            .spawn(move || cpu.drive())
            .map_err(|err| {
                self.running.store(false, Ordering::Release);
                self.clock.stop();
                *self.phase.lock() = CpuPhase::Loaded;
                ControlError::Spawn(err.to_string())
            })
    }

    /// Ends the current run at the next cycle or tick boundary.
    ///
    /// Safe to call from any thread and any number of times; the run loop
    /// reports `Stopped` once.
    pub fn stop_running(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            debug!("stop requested");
        }
        self.clock.stop();
        self.io.cancel_read();
    }

    /// Withholds ticks and cancels a pending console read. Returns false when not running.
    pub fn pause(&self) -> bool {
        {
            let mut phase = self.phase.lock();
            if *phase != CpuPhase::Running {
                return false;
            }
            *phase = CpuPhase::Paused;
        }
        self.clock.pause();
        self.pauses.fetch_add(1, Ordering::AcqRel);
        self.io.cancel_read();
        self.bus.send(&Message::Simulation(SimulationDetail::Paused));
        debug!("paused");
        true
    }

    /// Resumes a paused run. Returns false when not paused.
    pub fn resume(&self) -> bool {
        {
            let mut phase = self.phase.lock();
            if *phase != CpuPhase::Paused {
                return false;
            }
            *phase = CpuPhase::Running;
        }
        self.clock.resume();
        self.bus.send(&Message::Simulation(SimulationDetail::Resumed));
        debug!("resumed");
        true
    }

    /// Lets a paused run execute exactly one more cycle. Returns false when not paused.
    pub fn step(&self) -> bool {
        *self.phase.lock() == CpuPhase::Paused && self.clock.step()
    }

    /// Sets the tick period; takes effect from the next tick.
    pub fn set_tick_millis(&self, tick_millis: u64) {
        let period = {
            let mut config = self.config.lock();
            config.tick_millis = tick_millis;
            config.cycle_period()
        };
        self.clock.set_period(period);
    }

    /// Sets the tick period from a cycle frequency; `0` runs unthrottled.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidFrequency`] for negative or non-finite input.
    pub fn set_cycle_frequency(&self, hz: f64) -> Result<(), ControlError> {
        let tick_millis = self.config.lock().tick_millis_for_frequency(hz)?;
        self.set_tick_millis(tick_millis);
        Ok(())
    }

    /// Switches pipelined scheduling.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::Running`] during a run.
    pub fn set_pipelined(&self, pipelined: bool) -> Result<(), ControlError> {
        if self.phase.lock().is_active() {
            return Err(ControlError::Running);
        }
        let period = {
            let mut config = self.config.lock();
            config.pipelined = pipelined;
            config.cycle_period()
        };
        self.clock.set_period(period);
        *self.pipeline.lock() = [None; 3];
        Ok(())
    }

    /// Enables or disables sandbox dispatch. Annotation messages are sent either way.
    pub fn set_annotations_enabled(&self, enabled: bool) {
        self.annotations_enabled.store(enabled, Ordering::Release);
        self.config.lock().annotations_enabled = enabled;
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> SimConfig {
        *self.config.lock()
    }

    /// True while the run loop is active and has not been asked to stop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> CpuPhase {
        *self.phase.lock()
    }

    /// Display snapshot; fields are read one at a time.
    #[must_use]
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            phase: self.phase(),
            program_counter: self.machine.program_counter(),
            instruction_register: self.instruction_register.lock().clone(),
            registers: self.machine.registers().snapshot(),
        }
    }

    /// Reads memory for display.
    ///
    /// # Errors
    ///
    /// Returns the memory fault the access raises.
    pub fn read_memory(&self, address: Address, width: AccessWidth) -> Result<Word, Fault> {
        self.machine.read(address, width)
    }

    /// Loaded program, if any.
    #[must_use]
    pub fn program(&self) -> Option<Arc<Program>> {
        self.program.read().clone()
    }

    /// Current program counter.
    #[must_use]
    pub fn program_counter(&self) -> Address {
        self.machine.program_counter()
    }

    /// Exit code of the last clean exit in this run (`0` when none was given).
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    fn begin_run(&self) -> Result<(), ControlError> {
        let mut phase = self.phase.lock();
        if phase.is_active() {
            return Err(ControlError::Running);
        }
        if self.program.read().is_none() {
            return Err(ControlError::NotLoaded);
        }
        *phase = CpuPhase::Running;
        drop(phase);

        self.running.store(true, Ordering::Release);
        self.stop_reported.store(false, Ordering::Release);
        *self.exit_code.lock() = None;
        self.clock.set_period(self.config.lock().cycle_period());
        self.clock.start();
        Ok(())
    }

    fn drive(&self) {
        info!(pc = %self.machine.program_counter(), "simulation started");
        self.bus.send(&Message::Simulation(SimulationDetail::Started));

        let init = self
            .program()
            .and_then(|program| program.init_annotation.clone());
        if let Some(annotation) = init {
            if let Err(fault) = self.dispatch_annotation(&annotation, None) {
                self.report_fault(fault);
            }
        }

        while self.is_running() {
            if let Err(fault) = self.run_single_cycle() {
                self.report_fault(fault);
            }
            if self.is_running() && self.clock.wait_for_next_tick().is_err() {
                debug!("tick wait interrupted");
                self.bus
                    .send(&Message::Simulation(SimulationDetail::Interrupted));
            }
        }
        self.finish_run();
    }

    fn report_fault(&self, fault: Fault) {
        self.running.store(false, Ordering::Release);
        warn!(class = ?fault.class(), %fault, "run terminated by fault");
        self.bus.send(&Message::Problem {
            message: fault.to_string(),
            fault: Some(fault),
        });
    }

    fn finish_run(&self) {
        self.running.store(false, Ordering::Release);
        self.clock.stop();
        *self.phase.lock() = CpuPhase::Stopped;
        if !self.stop_reported.swap(true, Ordering::AcqRel) {
            info!(pc = %self.machine.program_counter(), "simulation stopped");
            self.bus
                .send(&Message::Simulation(SimulationDetail::Stopped));
        }
    }

    fn advance_pipeline(&self, fetched: Address) {
        let [fetch, decode, execute] = {
            let mut slots = self.pipeline.lock();
            *slots = [Some(fetched), slots[0], slots[1]];
            *slots
        };
        self.bus.send(&Message::PipelineState {
            fetch,
            decode,
            execute,
        });
    }

    /// Runs `annotation` in the sandbox (when enabled) and announces it.
    ///
    /// A violation is a fault; any other script error is reported and the
    /// run continues.
    fn dispatch_annotation(
        &self,
        annotation: &Annotation,
        address: Option<Address>,
    ) -> Result<(), Fault> {
        if self.annotations_enabled.load(Ordering::Acquire) {
            let result = self
                .sandbox
                .lock()
                .as_ref()
                .map(|sandbox| sandbox.exec(&annotation.code).map(drop));
            match result {
                Some(Err(SandboxError::Violation(violation))) => return Err(violation.into()),
                Some(Err(err)) => {
                    warn!(address = ?address, %err, "annotation failed");
                    self.bus
                        .send(&Message::problem(format!("annotation failed: {err}")));
                }
                Some(Ok(())) | None => {}
            }
        }
        self.bus.send(&Message::Annotation {
            annotation: annotation.clone(),
            address,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Cpu, CycleOutcome, FELL_OFF_END};
    use crate::annotation::Sandbox;
    use crate::api::{ControlError, SimConfig};
    use crate::io::BufferedIo;
    use crate::listener::MessageLog;
    use crate::message::{Message, SimulationDetail, Stage};
    use crate::{
        Address, CpuPhase, Fault, Instruction, Operand, ProgramBuilder, Register, Word,
    };
    use rstest::rstest;

    fn cpu() -> (Cpu, Arc<MessageLog>) {
        let cpu = Cpu::new(Arc::new(BufferedIo::new()), SimConfig::default());
        let log = Arc::new(MessageLog::new());
        cpu.register_listener(log.clone());
        (cpu, log)
    }

    fn r(register: Register) -> Operand {
        Operand::Register(register)
    }

    #[rstest]
    #[case("main")]
    #[case("MAIN")]
    #[case("Main")]
    fn entry_point_label_is_case_insensitive(#[case] label: &str) {
        let program = ProgramBuilder::new()
            .instruction(Instruction::Nop, Vec::new())
            .label(label)
            .instruction(Instruction::Exit, Vec::new())
            .build();
        let (cpu, _) = cpu();
        assert_eq!(cpu.load_program(Arc::new(program)), Ok(()));
        assert_eq!(cpu.program_counter(), Address::new(0x0040_0004));
        assert_eq!(cpu.phase(), CpuPhase::Loaded);
    }

    #[test]
    fn load_seeds_pointers_and_announces_every_register() {
        let (cpu, log) = cpu();
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Exit, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        let snapshot = cpu.snapshot();
        assert_eq!(snapshot.registers[Register::Sp.index()], Word::from_unsigned(0x7fff_effc));
        assert_eq!(snapshot.registers[Register::Gp.index()], Word::from_unsigned(0x1000_8000));
        let messages = log.take();
        assert_eq!(
            messages
                .iter()
                .filter(|message| matches!(message, Message::RegisterChanged { .. }))
                .count(),
            32
        );
        assert_eq!(
            messages.last(),
            Some(&Message::Simulation(SimulationDetail::ProgramLoaded))
        );
    }

    #[test]
    fn missing_entry_point_keeps_previous_load() {
        let (cpu, log) = cpu();
        let first = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Li, [r(Register::T0), Operand::Immediate(9)])
            .instruction(Instruction::Exit, Vec::new())
            .build();
        cpu.load_program(Arc::new(first)).expect("load");
        cpu.run_single_cycle().expect("cycle");
        let before = cpu.snapshot();
        log.take();

        let headless = ProgramBuilder::new()
            .label("start")
            .instruction(Instruction::Nop, Vec::new())
            .build();
        assert_eq!(
            cpu.load_program(Arc::new(headless)),
            Err(ControlError::Fault(Fault::NoEntryPoint))
        );
        assert_eq!(cpu.snapshot(), before);
        assert!(log.messages().iter().all(Message::is_problem));
    }

    #[test]
    fn nop_cycle_advances_one_word_in_message_order() {
        let (cpu, log) = cpu();
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Nop, Vec::new())
            .instruction(Instruction::Exit, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        log.take();

        assert_eq!(cpu.run_single_cycle(), Ok(CycleOutcome::Continued));
        assert_eq!(cpu.program_counter(), Address::new(0x0040_0004));
        let messages = log.take();
        assert_eq!(messages[0], Message::StageEnter(Stage::Fetch));
        assert!(matches!(messages[1], Message::DataMovement { address, .. } if address == Address::new(0x0040_0000)));
        assert!(!messages
            .iter()
            .any(|message| matches!(message, Message::Annotation { .. })));
    }

    #[test]
    fn exit_reports_code() {
        let (cpu, _) = cpu();
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Li, [r(Register::V0), Operand::Immediate(17)])
            .instruction(Instruction::Li, [r(Register::A0), Operand::Immediate(4)])
            .instruction(Instruction::Syscall, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        cpu.run_single_cycle().expect("li");
        cpu.run_single_cycle().expect("li");
        assert_eq!(cpu.run_single_cycle(), Ok(CycleOutcome::Exited { code: Some(4) }));
        assert_eq!(cpu.exit_code(), Some(4));
    }

    #[test]
    fn running_past_last_statement_is_a_problem() {
        let (cpu, log) = cpu();
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Nop, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        assert_eq!(cpu.run_single_cycle(), Ok(CycleOutcome::FellOffEnd));
        assert!(log.messages().contains(&Message::problem(FELL_OFF_END)));
    }

    #[test]
    fn annotations_run_in_the_attached_sandbox() {
        let (cpu, log) = cpu();
        cpu.attach_sandbox(Sandbox::new().expect("sandbox")).expect("attach");
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Li, [r(Register::T0), Operand::Immediate(5)])
            .annotate("seen = reg.t0:get()")
            .instruction(Instruction::Exit, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        cpu.run_single_cycle().expect("cycle");
        assert_eq!(
            cpu.with_sandbox(|sandbox| sandbox.get_global::<i64>("seen")),
            Some(Ok(5))
        );
        assert!(log.messages().iter().any(|message| matches!(
            message,
            Message::Annotation { address: Some(address), .. } if *address == Address::new(0x0040_0000)
        )));
    }

    #[test]
    fn disabled_annotations_still_announce() {
        let (cpu, log) = cpu();
        cpu.attach_sandbox(Sandbox::new().expect("sandbox")).expect("attach");
        cpu.set_annotations_enabled(false);
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Nop, Vec::new())
            .annotate("ran = true")
            .instruction(Instruction::Exit, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        cpu.run_single_cycle().expect("cycle");
        assert_eq!(
            cpu.with_sandbox(|sandbox| sandbox.get_global::<Option<bool>>("ran")),
            Some(Ok(None))
        );
        assert!(log
            .messages()
            .iter()
            .any(|message| matches!(message, Message::Annotation { .. })));
    }

    #[test]
    fn sandbox_violation_is_a_cycle_fault_and_script_error_is_not() {
        let (cpu, log) = cpu();
        cpu.attach_sandbox(Sandbox::new().expect("sandbox")).expect("attach");
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Nop, Vec::new())
            .annotate("error('oops')")
            .instruction(Instruction::Nop, Vec::new())
            .annotate("os.exit(1)")
            .instruction(Instruction::Exit, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        assert_eq!(cpu.run_single_cycle(), Ok(CycleOutcome::Continued));
        assert!(log.messages().iter().any(Message::is_problem));
        assert!(matches!(cpu.run_single_cycle(), Err(Fault::Sandbox(_))));
    }

    #[test]
    fn pipelined_cycles_report_stage_occupancy() {
        let (cpu, log) = cpu();
        cpu.set_pipelined(true).expect("idle");
        let program = ProgramBuilder::new()
            .label("main")
            .instruction(Instruction::Nop, Vec::new())
            .instruction(Instruction::Nop, Vec::new())
            .instruction(Instruction::Exit, Vec::new())
            .build();
        cpu.load_program(Arc::new(program)).expect("load");
        cpu.run_single_cycle().expect("first");
        cpu.run_single_cycle().expect("second");
        let states = log
            .messages()
            .into_iter()
            .filter(|message| matches!(message, Message::PipelineState { .. }))
            .collect::<Vec<_>>();
        assert_eq!(
            states.last(),
            Some(&Message::PipelineState {
                fetch: Some(Address::new(0x0040_0004)),
                decode: Some(Address::new(0x0040_0000)),
                execute: None,
            })
        );
    }

    #[test]
    fn control_requires_a_loaded_idle_cpu() {
        let (cpu, _) = cpu();
        assert_eq!(cpu.run_program(), Err(ControlError::NotLoaded));
        assert!(!cpu.pause());
        assert!(!cpu.resume());
        assert!(!cpu.step());
        assert_eq!(
            cpu.set_cycle_frequency(-2.0),
            Err(ControlError::InvalidFrequency(-2.0))
        );
        assert_eq!(cpu.run_single_cycle(), Err(Fault::NoProgramLoaded));
    }
}
