//! Interactive prompts.
//!
//! Re-prompting on an invalid answer is bounded: after
//! [`MAX_PROMPT_ATTEMPTS`] invalid answers the question counts as declined.
//! End of input always counts as declined.

use crate::error::{CoworkError, Result};
use std::io::{self, BufRead, Write};

pub const MAX_PROMPT_ATTEMPTS: usize = 3;

pub trait Prompter {
    /// Asks a free-form question. `None` means input ended.
    fn ask(&self, question: &str) -> Result<Option<String>>;

    /// Prints an informational message.
    fn say(&self, message: &str);

    /// Yes/no question, defaulting to no.
    fn confirm(&self, question: &str) -> Result<bool> {
        for _ in 0..MAX_PROMPT_ATTEMPTS {
            let Some(answer) = self.ask(&format!("{} [y/N] ", question))? else {
                return Ok(false);
            };
            match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "" | "n" | "no" => return Ok(false),
                _ => self.say("Please answer y or n."),
            }
        }
        Ok(false)
    }

    /// Numbered menu. Returns the zero-based index of the chosen option.
    fn choose(&self, question: &str, options: &[&str]) -> Result<Option<usize>> {
        self.say(question);
        for (index, option) in options.iter().enumerate() {
            self.say(&format!("  {}) {}", index + 1, option));
        }
        for _ in 0..MAX_PROMPT_ATTEMPTS {
            let Some(answer) = self.ask(&format!("Choice [1-{}]: ", options.len()))? else {
                return Ok(None);
            };
            match answer.trim().parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Ok(Some(n - 1)),
                _ => self.say(&format!("Enter a number between 1 and {}.", options.len())),
            }
        }
        Ok(None)
    }
}

/// Prompter bound to the process's stdin and stdout.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", question).map_err(|e| CoworkError::io("writing prompt", e))?;
        stdout.flush().map_err(|e| CoworkError::io("writing prompt", e))?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| CoworkError::io("reading answer", e))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn say(&self, message: &str) {
        println!("{}", message);
    }
}
