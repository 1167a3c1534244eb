use std::fmt;
use std::io::{self, Write};

/// Plain-text status channel the samples print to.
pub struct Console {
    out: Box<dyn Write + Send>,
}

impl Console {
    pub fn stdout() -> Self {
        Console {
            out: Box::new(io::stdout()),
        }
    }

    pub fn new(out: impl Write + Send + 'static) -> Self {
        Console { out: Box::new(out) }
    }

    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        // A closed stdout must not take the session down with it.
        if let Err(e) = writeln!(self.out, "{args}").and_then(|_| self.out.flush()) {
            log::debug!("console write failed: {e}");
        }
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

/// `console_line!(console, "fmt", args..)`
#[macro_export]
macro_rules! console_line {
    ($console:expr, $($arg:tt)*) => {
        $console.line(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SharedBuffer;

    #[test]
    fn test_lines_are_captured() {
        let buffer = SharedBuffer::default();
        let mut console = Console::new(buffer.clone());

        console_line!(console, "Sending message: {}", 1);
        console.line(format_args!("done"));

        assert_eq!(buffer.lines(), vec!["Sending message: 1", "done"]);
    }
}
