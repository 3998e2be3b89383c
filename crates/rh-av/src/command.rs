//! Templated external process execution.
//!
//! A [`ProcessCommand`] pairs an executable with a whitespace-delimited
//! argument template. Tokens starting with [`VAR_SIGIL`] are placeholders
//! replaced by zero or more literal tokens bound through
//! [`ProcessCommand::add_var`]; unbound placeholders vanish, which lets a
//! template carry optional argument groups.
//!
//! # Example
//!
//! ```no_run
//! use rh_av::{ProcessCommand, ProgressUnit};
//!
//! # async fn example() -> rh_core::Result<()> {
//! let mut cmd = ProcessCommand::new("ffmpeg", "-i $INPUT $MAP -f null -", ProgressUnit::Unknown);
//! cmd.add_var("INPUT", ["/media/movie.mkv"]);
//! cmd.add_var("MAP", ["-map", "0:a:1"]);
//! let output = cmd.execute_sync().await?;
//! println!("{}", String::from_utf8_lossy(&output));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use rh_core::{CommandEvent, Error, ExitError, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::lines::LineCodec;
use crate::progress::{ProgressParser, ProgressUnit};
use crate::transcript::TranscriptWriter;

/// Prefix marking a template placeholder.
pub const VAR_SIGIL: char = '$';

/// Capacity of the per-execution event channel.
const EVENT_BUFFER: usize = 64;

/// Number of trailing output lines quoted in a failure message.
const ERROR_TAIL_LINES: usize = 5;

/// An executable plus an argument template and its variable bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCommand {
    program: PathBuf,
    template: Vec<String>,
    vars: BTreeMap<String, Vec<String>>,
    log_path: Option<PathBuf>,
    progress: ProgressUnit,
    #[serde(skip)]
    timeout: Option<Duration>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>, template: &str, progress: ProgressUnit) -> Self {
        Self {
            program: program.into(),
            template: template.split_whitespace().map(str::to_string).collect(),
            vars: BTreeMap::new(),
            log_path: None,
            progress,
            timeout: None,
        }
    }

    /// Bind `name` (without the sigil) to a list of literal tokens.
    /// A later binding of the same name replaces the earlier one.
    pub fn add_var<I, S>(&mut self, name: &str, tokens: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.trim_start_matches(VAR_SIGIL).to_string();
        self.vars
            .insert(name, tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Persist the full output transcript to `path` during async execution.
    pub fn log_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.log_path = Some(path.into());
        self
    }

    /// Deadline for [`execute_sync`](Self::execute_sync).
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = Some(d);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn progress_unit(&self) -> ProgressUnit {
        self.progress
    }

    pub fn transcript_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// The fully interpolated argument list.
    pub fn args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.template.len());
        for token in &self.template {
            match token.strip_prefix(VAR_SIGIL) {
                Some(name) if !name.is_empty() => {
                    if let Some(bound) = self.vars.get(name) {
                        out.extend(bound.iter().cloned());
                    }
                }
                _ => out.push(token.clone()),
            }
        }
        out
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion and return stdout followed by stderr.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tool`] if the process cannot be spawned, times out,
    /// or exits unsuccessfully (the message quotes the tail of the output).
    pub async fn execute_sync(&self) -> Result<Vec<u8>> {
        let tool = self.tool_name();
        let child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&tool, format!("failed to spawn: {e}")))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| Error::tool(&tool, format!("timed out after {limit:?}")))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| Error::tool(&tool, format!("I/O error waiting for process: {e}")))?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        if !output.status.success() {
            let text = String::from_utf8_lossy(&combined);
            let lines: Vec<&str> = text.lines().collect();
            let tail = lines[lines.len().saturating_sub(ERROR_TAIL_LINES)..].join("\n");
            return Err(Error::tool(
                tool,
                format!("exited with status {}: {}", output.status, tail.trim()),
            ));
        }

        Ok(combined)
    }

    /// Spawn the process and stream its output as [`CommandEvent`]s.
    ///
    /// The returned [`Execution`] always ends with exactly one
    /// [`CommandEvent::Exit`], including when the process cannot be spawned
    /// or is cancelled. Must be called inside a tokio runtime.
    pub fn execute(&self) -> Execution {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(run(self.clone(), tx, cancel.clone()));
        Execution { events: rx, cancel }
    }
}

/// Renders the program and arguments, quoting tokens that need it, so that
/// [`split_command_line`] yields the exact argv again.
impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.program.to_string_lossy()))?;
        for arg in self.args() {
            write!(f, " {}", quote(&arg))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Async execution
// ---------------------------------------------------------------------------

/// A running process. Dropping it does not stop the process; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct Execution {
    events: mpsc::Receiver<CommandEvent>,
    cancel: CancellationToken,
}

impl Execution {
    /// Assemble an execution from an event stream and the token that stops
    /// its producer. The producer must end the stream with one
    /// [`CommandEvent::Exit`].
    pub fn from_parts(events: mpsc::Receiver<CommandEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next event, or `None` once the terminal event has been delivered.
    pub async fn next(&mut self) -> Option<CommandEvent> {
        self.events.recv().await
    }

    /// Kill the process. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain every event and return the terminal outcome.
    pub async fn wait(mut self) -> std::result::Result<(), ExitError> {
        while let Some(event) = self.next().await {
            if let CommandEvent::Exit(outcome) = event {
                return outcome;
            }
        }
        Err(ExitError::Io("event stream closed without exit".into()))
    }
}

async fn run(cmd: ProcessCommand, tx: mpsc::Sender<CommandEvent>, cancel: CancellationToken) {
    let transcript = TranscriptWriter::spawn(cmd.log_path.clone());
    let outcome = supervise(&cmd, &tx, &cancel, &transcript).await;
    transcript.finish().await;

    match &outcome {
        Ok(()) => tracing::debug!(program = %cmd.program.display(), "Process finished"),
        Err(e) => tracing::debug!(program = %cmd.program.display(), error = %e, "Process failed"),
    }
    let _ = tx.send(CommandEvent::Exit(outcome)).await;
}

async fn supervise(
    cmd: &ProcessCommand,
    tx: &mpsc::Sender<CommandEvent>,
    cancel: &CancellationToken,
    transcript: &TranscriptWriter,
) -> std::result::Result<(), ExitError> {
    let parser = ProgressParser::new(cmd.progress).map_err(|e| ExitError::Spawn(e.to_string()))?;

    let mut child = cmd
        .command()
        .spawn()
        .map_err(|e| ExitError::Spawn(format!("{}: {e}", cmd.tool_name())))?;
    tracing::debug!(command = %cmd, pid = ?child.id(), "Process spawned");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExitError::Io("stdout was not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExitError::Io("stderr was not captured".into()))?;
    let mut lines =
        FramedRead::new(stdout, LineCodec::new()).merge(FramedRead::new(stderr, LineCodec::new()));

    let mut eta = cmd.progress.calculator();
    eta.start();
    let mut kill_sent = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled(), if !kill_sent => {
                kill_sent = true;
                if let Err(e) = child.start_kill() {
                    tracing::warn!(error = %e, "Failed to kill process");
                }
            }
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    transcript.write(&line);
                    let event = match parser.parse(&line) {
                        Some(value) => {
                            eta.update(value);
                            CommandEvent::Progress(eta.progress())
                        }
                        None => CommandEvent::Line(line),
                    };
                    // A consumer that went away must not stop the drain.
                    let _ = tx.send(event).await;
                }
                Some(Err(e)) => tracing::warn!(error = %e, "Failed reading process output"),
                None => break,
            },
        }
    }

    let status = child.wait().await.map_err(|e| ExitError::Io(e.to_string()))?;
    if status.success() {
        Ok(())
    } else if kill_sent {
        Err(ExitError::Cancelled)
    } else {
        Err(ExitError::Status(status.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Quoting
// ---------------------------------------------------------------------------

fn needs_quoting(token: &str) -> bool {
    token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\'))
}

fn quote(token: &str) -> String {
    if !needs_quoting(token) {
        return token.to_string();
    }
    format!("'{}'", token.replace('\'', r"'\''"))
}

/// Split a rendered command line back into its tokens.
///
/// Understands single quotes (literal), double quotes (with `\"` and `\\`
/// escapes) and backslash escapes outside quotes.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    #[derive(PartialEq)]
    enum State {
        Plain,
        Single,
        Double,
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut state = State::Plain;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match state {
            State::Plain => match c {
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                '\'' => {
                    state = State::Single;
                    in_token = true;
                }
                '"' => {
                    state = State::Double;
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                    in_token = true;
                }
                other => {
                    current.push(other);
                    in_token = true;
                }
            },
            State::Single => match c {
                '\'' => state = State::Plain,
                other => current.push(other),
            },
            State::Double => match c {
                '"' => state = State::Plain,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => current.push('\\'),
                },
                other => current.push(other),
            },
        }
    }

    if state != State::Plain {
        return Err(Error::validation(format!("unterminated quote in: {line}")));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
