//! External reader processes started on first use.

use super::bridge::ExternalReaderBridge;
use crate::error::{ConfigError, ProtocolError};
use crate::project::ExternalReaderCommand;
use parking_lot::Mutex;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tessera_types::EvaluatorId;

/// Starts the reader process and connects a bridge to its stdio.
///
/// stderr is inherited so the reader's own diagnostics reach the user.
///
/// # Errors
///
/// Returns [`ConfigError::ExternalReaderSpawn`] if the process or its
/// reader thread cannot be started.
pub fn spawn(
    command: &ExternalReaderCommand,
    evaluator_id: EvaluatorId,
) -> Result<ExternalReaderBridge, ConfigError> {
    let spawn_error = |source| ConfigError::ExternalReaderSpawn {
        command: command.display(),
        source,
    };
    let mut child = Command::new(&command.executable)
        .args(&command.arguments)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(spawn_error)?;
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        let _ = child.kill();
        return Err(spawn_error(std::io::Error::other("stdio pipes unavailable")));
    };
    let bridge = match ExternalReaderBridge::new(stdout, stdin, evaluator_id) {
        Ok(bridge) => bridge,
        Err(e) => {
            let _ = child.kill();
            return Err(spawn_error(e));
        }
    };
    tracing::info!(command = %command.display(), pid = child.id(), "started external reader");
    Ok(bridge.with_child(child))
}

/// An external reader command whose process starts on the first request.
#[derive(Debug)]
pub struct ExternalReaderProcess {
    command: ExternalReaderCommand,
    evaluator_id: EvaluatorId,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Running(Arc<ExternalReaderBridge>),
    Closed,
}

impl ExternalReaderProcess {
    #[must_use]
    pub fn new(command: ExternalReaderCommand, evaluator_id: EvaluatorId) -> Self {
        Self {
            command,
            evaluator_id,
            state: Mutex::new(State::Idle),
        }
    }

    #[must_use]
    pub fn command(&self) -> &ExternalReaderCommand {
        &self.command
    }

    /// Returns the running bridge, starting the process if needed.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Spawn`] if the process cannot start;
    /// [`ProtocolError::TransportClosed`] after [`close`](Self::close).
    pub fn bridge(&self) -> Result<Arc<ExternalReaderBridge>, ProtocolError> {
        let mut state = self.state.lock();
        match &*state {
            State::Running(bridge) => Ok(Arc::clone(bridge)),
            State::Closed => Err(ProtocolError::TransportClosed),
            State::Idle => {
                let bridge = spawn(&self.command, self.evaluator_id)
                    .map(Arc::new)
                    .map_err(|e| ProtocolError::Spawn(e.to_string()))?;
                *state = State::Running(Arc::clone(&bridge));
                Ok(bridge)
            }
        }
    }

    /// Stops the process if it was started. Idempotent.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Closed);
        if let State::Running(bridge) = previous {
            bridge.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_is_spawn_error() {
        let process = ExternalReaderProcess::new(
            ExternalReaderCommand::new("/nonexistent/tessera-reader"),
            EvaluatorId::new(),
        );
        let err = process.bridge().expect_err("should fail to spawn");
        assert!(matches!(err, ProtocolError::Spawn(ref msg) if msg.contains("tessera-reader")), "got: {err}");
    }

    #[test]
    fn closed_process_never_spawns() {
        let process = ExternalReaderProcess::new(
            ExternalReaderCommand::new("/nonexistent/tessera-reader"),
            EvaluatorId::new(),
        );
        process.close();
        process.close();
        assert_eq!(
            process.bridge().expect_err("should be closed"),
            ProtocolError::TransportClosed
        );
    }

    #[cfg(unix)]
    #[test]
    fn spawned_bridge_is_reused_and_closed() {
        let process = ExternalReaderProcess::new(
            ExternalReaderCommand::new("cat"),
            EvaluatorId::from_raw(9),
        );
        let first = process.bridge().expect("should spawn cat");
        let second = process.bridge().expect("should reuse bridge");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.evaluator_id(), EvaluatorId::from_raw(9));
        process.close();
        assert!(first.is_closed());
    }
}
