// Fallback extractors backed by an external program or by a saved answer.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use snafu::prelude::*;
use vote_extraction::*;

use crate::extract::io_common::read_json_file;
use crate::extract::*;

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    identifier: &'a str,
    city: &'a str,
    #[serde(rename = "meetingDate")]
    meeting_date: String,
    text: &'a str,
    deterministic: CanonicalDocument,
    diagnostics: &'a [Diagnostic],
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs a shell command for every low-confidence document. The request is
/// written as JSON on its standard input, and a canonical document is
/// expected on its standard output.
///
/// The command is killed when it runs longer than the timeout.
#[derive(Debug, Clone)]
pub struct CommandFallback {
    command: String,
    timeout: Duration,
    output: StandardOutputBuilder,
}

impl CommandFallback {
    pub fn new(command: &str, timeout: Duration) -> CommandFallback {
        CommandFallback {
            command: command.to_string(),
            timeout,
            output: StandardOutputBuilder::new(),
        }
    }

    fn request_body(&self, request: &FallbackRequest) -> Result<String, FallbackError> {
        let meeting = MeetingMetadata {
            city: request.city.clone(),
            meeting_date: request.meeting_date,
        };
        let body = CommandRequest {
            identifier: &request.document_identifier,
            city: &request.city,
            meeting_date: request.meeting_date.format("%Y-%m-%d").to_string(),
            text: &request.document_text,
            deterministic: self.output.build(&meeting, &request.deterministic),
            diagnostics: &request.diagnostics,
        };
        serde_json::to_string(&body)
            .map_err(|e| unavailable(format!("cannot encode the request: {}", e)))
    }
}

fn unavailable(reason: String) -> FallbackError {
    FallbackError::Unavailable { reason }
}

fn shell(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    }
}

impl FallbackExtractor for CommandFallback {
    fn name(&self) -> &str {
        "command"
    }

    fn extract(&self, request: &FallbackRequest) -> Result<Vec<VoteRecord>, FallbackError> {
        let body = self.request_body(request)?;
        debug!(
            "CommandFallback: {} for {} ({} bytes)",
            self.command,
            request.document_identifier,
            body.len()
        );
        let mut child = shell(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| unavailable(format!("cannot start {}: {}", self.command, e)))?;

        // The child may start answering before it has read the whole request.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(body.as_bytes()) {
                    warn!("CommandFallback: cannot write the request: {}", e);
                }
            })
        });
        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut buf: Vec<u8> = Vec::new();
                stdout.read_to_end(&mut buf).map(|_| buf)
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        "CommandFallback: {} still running after {:?}, killing it",
                        self.command, self.timeout
                    );
                    if let Err(e) = child.kill() {
                        warn!("CommandFallback: cannot kill {}: {}", self.command, e);
                    }
                    let _ = child.wait();
                    return Err(FallbackError::Timeout {
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(unavailable(format!("{} failed: {}", self.command, e)));
                }
            }
        };
        if let Some(w) = writer {
            let _ = w.join();
        }
        let stdout = match reader.map(|r| r.join()) {
            Some(Ok(Ok(buf))) => buf,
            Some(Ok(Err(e))) => {
                return Err(unavailable(format!(
                    "cannot read the answer of {}: {}",
                    self.command, e
                )))
            }
            Some(Err(_)) => {
                return Err(unavailable(format!(
                    "cannot read the answer of {}",
                    self.command
                )))
            }
            None => Vec::new(),
        };
        if !status.success() {
            return Err(unavailable(format!(
                "{} exited with {}",
                self.command, status
            )));
        }
        let doc: CanonicalDocument = serde_json::from_slice(&stdout)
            .map_err(|e| unavailable(format!("invalid answer from {}: {}", self.command, e)))?;
        info!(
            "CommandFallback: {} votes for {}",
            doc.votes.len(),
            request.document_identifier
        );
        Ok(doc.into_records())
    }
}

/// Reads a canonical document saved earlier, to be replayed as the answer of
/// the fallback.
pub fn read_replay(path: &str) -> BExtractResult<StaticFallback> {
    let js = read_json_file(path)?;
    let doc: CanonicalDocument = serde_json::from_value(js).context(ParsingJsonSnafu { path })?;
    debug!("read_replay: {} votes in {}", doc.votes.len(), path);
    Ok(StaticFallback::new(doc.into_records()))
}
