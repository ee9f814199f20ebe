//! Demo program that crashes a few times before finishing cleanly.
//!
//! Environment:
//! - `FLAKY_STATE_DIR`: where the run counter lives (default: current dir)
//! - `FLAKY_FAILURES`: how many runs exit with code 1 first (default: 3)
//! - `FLAKY_LOG`: supervisor log file (default: `log_supervisor.txt`)
//! - `FLAKY_COPY_DIR`: directory for role-tagged copies (default: next to the binary)

use std::{env, fs, path::PathBuf, process};

use anyhow::Context;
use self_supervisor::{init, Role, SupervisorBuilder};

const RUNS_FILE: &str = "runs";
const DONE_FILE: &str = "done";

fn main() -> anyhow::Result<()> {
    let mut builder = SupervisorBuilder::new()
        .with_log_file(env::var_os("FLAKY_LOG").unwrap_or_else(|| "log_supervisor.txt".into()));
    if let Some(dir) = env::var_os("FLAKY_COPY_DIR") {
        builder = builder.with_copy_dir(dir);
    }
    let role = init(builder.build())?;

    let state_dir = env::var_os("FLAKY_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let failures: u32 = match env::var("FLAKY_FAILURES") {
        Ok(value) => value.parse().context("FLAKY_FAILURES must be a number")?,
        Err(_) => 3,
    };

    let runs_path = state_dir.join(RUNS_FILE);
    let runs = match fs::read_to_string(&runs_path) {
        Ok(text) => text.trim().parse::<u32>().context("corrupt run counter")?,
        Err(_) => 0,
    } + 1;
    fs::write(&runs_path, runs.to_string()).context("cannot write run counter")?;

    if runs <= failures {
        println!("flaky-worker ({role}) run {runs}: failing");
        process::exit(1);
    }
    fs::write(state_dir.join(DONE_FILE), runs.to_string()).context("cannot write done marker")?;
    println!("flaky-worker ({role}) run {runs}: done");
    if role == Role::Bypass {
        println!("ran without supervision");
    }
    Ok(())
}
