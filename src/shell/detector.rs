//! Command completion detection.
//!
//! The bridge never knows what a shell command does; it only watches the
//! accumulated stdout text until a detector says the shell is idle again.

use regex::Regex;

/// Characters skipped before prompt matching; they hold the echo of the
/// prompt the command was typed at.
const ECHO_SKIP_CHARS: usize = 4;

/// Decides when a submitted command has finished producing output.
///
/// `cycle` numbers the command being waited for; it grows by one for every
/// submission, starting at 0 for the startup banner.
pub trait CompletionDetector: Send {
    /// Line written to the shell right after each command.
    fn trailer(&self, cycle: u64) -> String;

    /// Whether `output` shows the shell back at rest after command `cycle`.
    fn is_idle(&self, output: &str, cycle: u64) -> bool;

    /// Turn the collected output into the text sent over the link.
    fn finish(&self, output: String, _cycle: u64) -> String {
        output
    }
}

/// Matches the shell's idle prompt in multi-line mode.
///
/// The default pattern fits `cmd.exe` (`C:\path>`); other shells need their
/// own pattern.
#[derive(Debug, Clone)]
pub struct PromptDetector {
    prompt: Regex,
}

impl PromptDetector {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let prompt = Regex::new(&format!("(?m){pattern}"))?;
        Ok(Self { prompt })
    }
}

impl CompletionDetector for PromptDetector {
    fn trailer(&self, _cycle: u64) -> String {
        String::new()
    }

    fn is_idle(&self, output: &str, _cycle: u64) -> bool {
        match output.char_indices().nth(ECHO_SKIP_CHARS) {
            Some((offset, _)) => self.prompt.is_match(&output[offset..]),
            None => false,
        }
    }
}

/// Waits for a numbered marker line printed by the shell after each command.
///
/// The trailer is a POSIX `printf` that puts `<marker><cycle>` on a line of
/// its own, even after output without a final newline. The typed trailer
/// never contains that token, so an echoing shell cannot complete early.
/// Markers of earlier, timed-out cycles delimit stale output.
#[derive(Debug, Clone)]
pub struct SentinelDetector {
    marker: String,
}

impl SentinelDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Marker text must survive unquoted on a shell command line.
    pub fn is_valid_marker(marker: &str) -> bool {
        !marker.is_empty() && marker.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    fn token(&self, cycle: u64) -> String {
        format!("{}{}", self.marker, cycle)
    }

    /// Cycle number carried by a marker line, if `line` is one.
    fn marker_cycle(&self, line: &str) -> Option<u64> {
        let digits = line.trim_end().strip_prefix(self.marker.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl CompletionDetector for SentinelDetector {
    fn trailer(&self, cycle: u64) -> String {
        format!("printf '\\n%s%s\\n' {} {}", self.marker, cycle)
    }

    fn is_idle(&self, output: &str, cycle: u64) -> bool {
        output
            .lines()
            .any(|line| self.marker_cycle(line) == Some(cycle))
    }

    fn finish(&self, output: String, cycle: u64) -> String {
        let mut kept = String::with_capacity(output.len());
        for line in output.split_inclusive('\n') {
            match self.marker_cycle(line) {
                Some(seen) if seen == cycle => {}
                // Everything up to an older marker belongs to a timed-out command
                Some(_) => kept.clear(),
                None => kept.push_str(line),
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PROMPT_PATTERN;

    fn cmd_prompt() -> PromptDetector {
        match PromptDetector::new(DEFAULT_PROMPT_PATTERN) {
            Ok(detector) => detector,
            Err(e) => panic!("default pattern must compile: {e}"),
        }
    }

    #[test]
    fn test_short_output_is_still_running() {
        let detector = cmd_prompt();
        assert!(!detector.is_idle("", 1));
        assert!(!detector.is_idle("C:\\>", 1));
        // Exactly four characters, even though they look like a prompt.
        assert!(!detector.is_idle("D:\\>", 1));
    }

    #[test]
    fn test_prompt_after_output_is_idle() {
        let detector = cmd_prompt();
        let output = "C:\\>echo hi\r\nhi\r\nC:\\>\r\n";
        assert!(detector.is_idle(output, 1));
    }

    #[test]
    fn test_echoed_command_line_alone_is_not_idle() {
        let detector = cmd_prompt();
        // The first four characters hide the prompt the command was typed at.
        assert!(!detector.is_idle("C:\\>dir /s\r\n", 1));
        assert!(!detector.is_idle("C:\\>dir /s\r\n Volume in drive C has no label.\r\n", 1));
    }

    #[test]
    fn test_nested_path_prompt() {
        let detector = cmd_prompt();
        let output = "C:\\>cd Windows\r\nC:\\Windows>\r\n";
        assert!(detector.is_idle(output, 1));
    }

    #[test]
    fn test_skip_counts_characters_not_bytes() {
        let detector = cmd_prompt();
        // Multi-byte characters in the skipped prefix must not split a code point.
        assert!(!detector.is_idle("é€ü", 1));
        assert!(detector.is_idle("é€üö\r\nC:\\>\r\n", 1));
    }

    #[test]
    fn test_custom_pattern() -> Result<(), regex::Error> {
        let detector = PromptDetector::new(r"^\$ $")?;
        assert!(detector.is_idle("ls\nfile\n$ \n", 3));
        assert!(!detector.is_idle("ls\nfile\n", 3));
        assert_eq!(detector.trailer(3), "");
        Ok(())
    }

    #[test]
    fn test_prompt_finish_keeps_output() {
        let detector = cmd_prompt();
        let output = "C:\\>ver\r\nVersion 10\r\nC:\\>\r\n".to_string();
        assert_eq!(detector.finish(output.clone(), 1), output);
    }

    #[test]
    fn test_sentinel_trailer_prints_numbered_marker() {
        let detector = SentinelDetector::new("__DONE__");
        assert_eq!(detector.trailer(7), "printf '\\n%s%s\\n' __DONE__ 7");
        // The typed trailer never looks like a marker line
        assert!(!detector.is_idle(&detector.trailer(7), 7));
    }

    #[test]
    fn test_sentinel_waits_for_its_own_cycle() {
        let detector = SentinelDetector::new("__DONE__");
        assert!(!detector.is_idle("hi\r\n", 2));
        assert!(!detector.is_idle("hi\r\n__DONE__1\r\n", 2));
        assert!(!detector.is_idle("__DONE__\r\n", 2));
        assert!(!detector.is_idle("__DONE__2 later\r\n", 2));
        assert!(!detector.is_idle("__DONE__21\r\n", 2));
        assert!(detector.is_idle("hi\r\n__DONE__2\r\n", 2));
    }

    #[test]
    fn test_sentinel_finish_strips_only_marker_lines() {
        let detector = SentinelDetector::new("__DONE__");
        let output = "hi\r\nabout __DONE__ markers\r\n__DONE__4\r\n".to_string();
        assert_eq!(detector.finish(output, 4), "hi\r\nabout __DONE__ markers\r\n");
    }

    #[test]
    fn test_sentinel_finish_drops_output_of_earlier_cycles() {
        let detector = SentinelDetector::new("__DONE__");
        let output = "late\r\n__DONE__3\r\nafter\r\n__DONE__4\r\n".to_string();
        assert_eq!(detector.finish(output, 4), "after\r\n");
    }

    #[test]
    fn test_marker_validation() {
        assert!(SentinelDetector::is_valid_marker("__SERIAL_BRIDGE_DONE__"));
        assert!(SentinelDetector::is_valid_marker("end42"));
        assert!(!SentinelDetector::is_valid_marker(""));
        assert!(!SentinelDetector::is_valid_marker("two words"));
        assert!(!SentinelDetector::is_valid_marker("it's"));
    }
}
