//! Operator input
//!
//! Reads commands from stdin on a background thread and hands them to the
//! dispatcher as an [`IntentSource`]. The prompt is only shown when stdin is
//! a terminal, so commands can also be piped in from a script.

use crate::core::dispatcher::{IntentSource, Submitted};
use async_trait::async_trait;
use std::io::{self, BufRead, Write};
use std::thread;
use tokio::sync::mpsc;

/// Operator prompt
pub const PROMPT: &str = "Enter command (1-9 to set speed, '-' to stop): ";

const QUEUE_DEPTH: usize = 16;

/// Is stdin attached to a terminal?
pub fn stdin_is_terminal() -> bool {
    atty::is(atty::Stream::Stdin)
}

/// Intent source backed by stdin
pub struct StdinIntents {
    receiver: mpsc::Receiver<String>,
    interactive: bool,
    prompted: bool,
}

impl StdinIntents {
    /// Start the reader thread
    pub fn spawn() -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);

        thread::Builder::new()
            .name("stdin-intents".into())
            .spawn(move || Self::reader_thread(&sender))?;

        Ok(Self {
            receiver,
            interactive: stdin_is_terminal(),
            prompted: false,
        })
    }

    fn reader_thread(sender: &mpsc::Sender<String>) {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if sender.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
        tracing::debug!("stdin closed");
    }

    fn prompt(&mut self) {
        if self.interactive && !self.prompted {
            let mut err = io::stderr();
            let _ = write!(err, "{PROMPT}");
            let _ = err.flush();
            self.prompted = true;
        }
    }
}

#[async_trait]
impl IntentSource for StdinIntents {
    async fn next_intent(&mut self) -> Option<String> {
        self.prompt();
        let line = self.receiver.recv().await;
        self.prompted = false;
        line
    }

    fn reject(&mut self, message: &str) {
        eprintln!("{message}");
    }

    fn accepted(&mut self, outcome: &Submitted) {
        if self.interactive {
            if let Submitted::Queued(command) = outcome {
                eprintln!("{command} queued until the rig is ready");
            }
        }
    }
}
