//! Integration tests for the sim CLI.

use serde as _;
use sim_cli as _;
use thiserror as _;
use tracing as _;
use tracing_subscriber as _;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use sim_core::{
    AddressOperand, Instruction, Operand, Program, ProgramBuilder, Register, DEFAULT_DATA_START,
};

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("sim")
}

fn write_program(dir: &Path, name: &str, program: &Program) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, serde_json::to_string(program).unwrap()).unwrap();
    path
}

fn reg(register: Register) -> Operand {
    Operand::Register(register)
}

fn greeting_program() -> Program {
    ProgramBuilder::new()
        .label("main")
        .instruction(
            Instruction::La,
            [
                reg(Register::A0),
                Operand::Address(AddressOperand::label(DEFAULT_DATA_START)),
            ],
        )
        .instruction(Instruction::Li, [reg(Register::V0), Operand::Immediate(4)])
        .instruction(Instruction::Syscall, Vec::new())
        .instruction(Instruction::Li, [reg(Register::V0), Operand::Immediate(10)])
        .instruction(Instruction::Syscall, Vec::new())
        .asciiz("greeting", "hello")
        .build()
}

#[test]
fn run_prints_program_output() {
    let temp_dir = tempfile::tempdir().unwrap();
    let program = write_program(temp_dir.path(), "hello.json", &greeting_program());

    let output = Command::new(binary_path())
        .args(["run", program.to_str().unwrap()])
        .output()
        .expect("failed to run sim");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello");
}

#[test]
fn program_without_exit_fails_with_problem() {
    let temp_dir = tempfile::tempdir().unwrap();
    let program = ProgramBuilder::new()
        .label("main")
        .instruction(Instruction::Nop, Vec::new())
        .build();
    let path = write_program(temp_dir.path(), "dirty.json", &program);

    let output = Command::new(binary_path())
        .args(["run", path.to_str().unwrap(), "--tick-ms", "0"])
        .output()
        .expect("failed to run sim");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("problem:"));
}

#[test]
fn missing_entry_point_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    let program = ProgramBuilder::new()
        .label("start")
        .instruction(Instruction::Exit, Vec::new())
        .build();
    let path = write_program(temp_dir.path(), "headless.json", &program);

    let output = Command::new(binary_path())
        .args(["run", path.to_str().unwrap()])
        .output()
        .expect("failed to run sim");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("main"));
}

#[test]
fn config_file_is_applied() {
    let temp_dir = tempfile::tempdir().unwrap();
    let program = write_program(temp_dir.path(), "hello.json", &greeting_program());
    let config = temp_dir.path().join("sim.json");
    fs::write(&config, r#"{ "tick_millis": 1, "pipelined": true }"#).unwrap();

    let output = Command::new(binary_path())
        .args([
            "run",
            program.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .output()
        .expect("failed to run sim");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello");
}

#[test]
fn unreadable_program_file_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let missing = temp_dir.path().join("absent.json");

    let output = Command::new(binary_path())
        .args(["run", missing.to_str().unwrap()])
        .output()
        .expect("failed to run sim");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.json"));
}

#[test]
fn repl_echoes_until_exit() {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new(binary_path())
        .arg("repl")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to run sim");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"x = 6 * 7\nx\nexit()\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("REPL start"));
    assert!(stdout.contains("Simulation not running, REPL running in its own engine"));
    assert!(stdout.contains("42"));
    assert!(stdout.ends_with("REPL stopped\n"));
}

#[test]
fn repl_violation_exits_with_failure() {
    use std::io::Write;
    use std::process::Stdio;

    let mut child = Command::new(binary_path())
        .arg("repl")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to run sim");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"os.exit(0)\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("sandbox violation"));
}

#[test]
fn help_shows_usage() {
    let output = Command::new(binary_path())
        .arg("--help")
        .output()
        .expect("failed to run sim");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("repl"));
}

#[test]
fn unknown_command_fails() {
    let output = Command::new(binary_path())
        .arg("assemble")
        .output()
        .expect("failed to run sim");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown command"));
}
