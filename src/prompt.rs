// ABOUTME: Interactive prompt seam with a dialoguer-backed terminal implementation
// ABOUTME: Prompts run on a blocking thread and race against run cancellation

use dialoguer::{Confirm, Input, Password, Select};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{MigratorError, Result};

/// Every method returns `Err(MigratorError::Cancelled)` when the user backs out.
pub trait Prompter: Send + Sync {
    fn text(&self, message: &str, placeholder: &str) -> Result<String>;
    fn password(&self, message: &str) -> Result<String>;
    fn confirm(&self, message: &str) -> Result<bool>;
    fn select(&self, message: &str, items: &[String]) -> Result<usize>;
}

pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn text(&self, message: &str, placeholder: &str) -> Result<String> {
        let value: String = Input::new()
            .with_prompt(message)
            .with_initial_text(placeholder)
            .validate_with(|input: &String| -> std::result::Result<(), &'static str> {
                if input.trim().is_empty() {
                    Err("a value is required")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;
        Ok(value.trim().to_string())
    }

    fn password(&self, message: &str) -> Result<String> {
        Ok(Password::new().with_prompt(message).interact()?)
    }

    fn confirm(&self, message: &str) -> Result<bool> {
        Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact_opt()?
            .ok_or(MigratorError::Cancelled)
    }

    fn select(&self, message: &str, items: &[String]) -> Result<usize> {
        Select::new()
            .with_prompt(message)
            .items(items)
            .default(0)
            .interact_opt()?
            .ok_or(MigratorError::Cancelled)
    }
}

/// Time a prompt thread gets to unwind after the run is cancelled.
const PROMPT_UNWIND: Duration = Duration::from_millis(200);

/// Runs a blocking prompt interaction off the async runtime.
///
/// A run cancelled before the prompt is shown yields `Interrupted`. Once the
/// prompt is on screen, cancellation is the user backing out of it: the prompt
/// gets a moment to report its own outcome, otherwise the result is `Cancelled`.
pub async fn ask<T, F>(prompter: &Arc<dyn Prompter>, cancel: &CancellationToken, interaction: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Prompter) -> Result<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(MigratorError::Interrupted);
    }

    let prompter = Arc::clone(prompter);
    let mut task = tokio::task::spawn_blocking(move || interaction(prompter.as_ref()));
    tokio::select! {
        biased;
        joined = &mut task => return joined.map_err(|e| MigratorError::Prompt(e.to_string()))?,
        _ = cancel.cancelled() => {}
    }

    match tokio::time::timeout(PROMPT_UNWIND, task).await {
        Ok(joined) => joined.map_err(|e| MigratorError::Prompt(e.to_string()))?,
        Err(_) => {
            // Password input keeps blocking on the terminal; leave it behind.
            debug!("Prompt still blocked after cancellation, abandoning it");
            Err(MigratorError::Cancelled)
        }
    }
}

/// Terminal attributes captured at startup. Abandoned prompts can leave
/// echo disabled and the cursor hidden; `restore` puts both back.
pub struct TerminalState {
    #[cfg(unix)]
    termios: Option<nix::sys::termios::Termios>,
}

impl TerminalState {
    pub fn capture() -> Self {
        Self {
            #[cfg(unix)]
            termios: nix::sys::termios::tcgetattr(std::io::stdin()).ok(),
        }
    }

    pub fn restore(&self) {
        #[cfg(unix)]
        if let Some(termios) = &self.termios {
            if let Err(e) = nix::sys::termios::tcsetattr(
                std::io::stdin(),
                nix::sys::termios::SetArg::TCSANOW,
                termios,
            ) {
                debug!("Failed to restore terminal attributes: {}", e);
            }
        }
        if let Err(e) = console::Term::stderr().show_cursor() {
            debug!("Failed to show cursor: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Answer {
        Text(String),
        Confirm(bool),
        Select(usize),
        Cancel,
    }

    /// Replays scripted answers and records every prompt shown.
    #[derive(Default)]
    pub struct ScriptedPrompter {
        answers: Mutex<VecDeque<Answer>>,
        pub asked: Mutex<Vec<String>>,
    }

    impl ScriptedPrompter {
        pub fn new(answers: Vec<Answer>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                asked: Mutex::new(Vec::new()),
            }
        }

        pub fn asked(&self) -> Vec<String> {
            self.asked.lock().unwrap().clone()
        }

        fn next(&self, message: &str) -> Answer {
            self.asked.lock().unwrap().push(message.to_string());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unscripted prompt: {}", message))
        }
    }

    impl Prompter for ScriptedPrompter {
        fn text(&self, message: &str, _placeholder: &str) -> Result<String> {
            match self.next(message) {
                Answer::Text(value) => Ok(value),
                Answer::Cancel => Err(MigratorError::Cancelled),
                other => panic!("expected text answer, got {:?}", other),
            }
        }

        fn password(&self, message: &str) -> Result<String> {
            self.text(message, "")
        }

        fn confirm(&self, message: &str) -> Result<bool> {
            match self.next(message) {
                Answer::Confirm(value) => Ok(value),
                Answer::Cancel => Err(MigratorError::Cancelled),
                other => panic!("expected confirm answer, got {:?}", other),
            }
        }

        fn select(&self, message: &str, _items: &[String]) -> Result<usize> {
            match self.next(message) {
                Answer::Select(index) => Ok(index),
                Answer::Cancel => Err(MigratorError::Cancelled),
                other => panic!("expected select answer, got {:?}", other),
            }
        }
    }
}
