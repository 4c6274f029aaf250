//! Human operator boundary: blocking prompts on the invoking terminal.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Fixed sentinel the operator types to signal an intervention is complete.
pub const INTERVENTION_SENTINEL: &str = "done";

/// Blocking operator interaction. Production uses [`ConsoleHuman`]; tests use
/// scripted channels.
pub trait HumanChannel {
    /// Write a prompt and read one line of response.
    fn ask_information(&self, prompt: &str) -> Result<String>;

    /// Write an explanation, block until the operator signals completion with
    /// the sentinel, then read one free-text explanation of what was done.
    fn ask_intervention(&self, explanation: &str) -> Result<String>;
}

/// Operator interaction over the process's own stdio.
pub struct ConsoleHuman;

impl HumanChannel for ConsoleHuman {
    fn ask_information(&self, prompt: &str) -> Result<String> {
        let mut stdout = std::io::stdout();
        writeln!(stdout, "\n[conductor] {prompt}").context("write prompt")?;
        write!(stdout, "> ").context("write prompt")?;
        stdout.flush().context("flush prompt")?;
        read_line()
    }

    fn ask_intervention(&self, explanation: &str) -> Result<String> {
        let mut stdout = std::io::stdout();
        writeln!(
            stdout,
            "\n[conductor] manual intervention needed:\n{explanation}\n\
             Type '{INTERVENTION_SENTINEL}' when finished."
        )
        .context("write intervention notice")?;
        stdout.flush().context("flush intervention notice")?;

        loop {
            let line = read_line()?;
            if line.trim().eq_ignore_ascii_case(INTERVENTION_SENTINEL) {
                break;
            }
            debug!(line = %line.trim(), "waiting for intervention sentinel");
        }

        writeln!(stdout, "[conductor] describe what you did:").context("write follow-up")?;
        write!(stdout, "> ").context("write follow-up")?;
        stdout.flush().context("flush follow-up")?;
        read_line()
    }
}

fn read_line() -> Result<String> {
    let mut line = String::new();
    let n = std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read operator input")?;
    if n == 0 {
        return Err(anyhow!("operator input stream closed"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
