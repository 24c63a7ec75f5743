// Operator consent for destructive PMem changes

use std::cell::RefCell;
use std::io::{self, BufRead, Write};

pub const PREPARE_WARNING: &str = "Memory allocation goals for PMem will be changed and namespaces \
modified. This may be a destructive operation: ensure namespaces are unmounted and locally \
attached PMem modules are not in use. It may take several minutes and a reboot may be required.";

pub const RESET_WARNING: &str = "Memory allocation goals for PMem will be changed and namespaces \
removed. This is a destructive operation: ensure namespaces are unmounted and locally attached \
PMem modules are not in use. A reboot will be required to apply the new goals.";

/// Source of a yes/no answer from the operator
#[cfg_attr(test, mockall::automock)]
pub trait ConsentPrompt {
    /// Show `warning` and ask for confirmation, `Ok(true)` on consent
    fn confirm(&self, warning: &str) -> io::Result<bool>;
}

/// Asks on an output stream and reads a single line of input
pub struct StdinConsent<R: BufRead, W: Write> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl StdinConsent<io::StdinLock<'static>, io::Stderr> {
    /// Prompt on stderr, read from stdin
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> StdinConsent<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }
}

impl<R: BufRead, W: Write> ConsentPrompt for StdinConsent<R, W> {
    fn confirm(&self, warning: &str) -> io::Result<bool> {
        {
            let mut out = self.output.borrow_mut();
            writeln!(out, "{}", warning)?;
            write!(out, "Are you sure you want to continue? (yes/no) ")?;
            out.flush()?;
        }

        let mut answer = String::new();
        self.input.borrow_mut().read_line(&mut answer)?;

        Ok(is_affirmative(&answer))
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
