//! Prompt, pager and output shaping for CLI sessions
//!
//! Matching runs against the tail of the receive buffer only, starting at
//! the last line break before the tail window, so long configurations do not
//! make every read quadratic.

use cfgvault_core::model::PAGER_PATTERN;
use cfgvault_core::VendorProfile;
use regex::bytes::Regex;

use super::AdapterError;

const TAIL_WINDOW: usize = 512;

/// Login and privilege prompts shared by every transport
const USERNAME_PROMPT: &str = r"(?i)(?:user ?name|login)\s*:\s*\z";
const PASSWORD_PROMPT: &str = r"(?i)password\s*:\s*\z";
const LOGIN_FAILURE: &str =
    r"(?im)(?:login incorrect|authentication failed|access denied|^\s*% ?(?:bad|login invalid|authentication))";

/// Error lines a device prints in place of the configuration
const COMMAND_ERROR: &str = r"(?im)^\s*(?:% ?invalid input|% ?unknown command|% ?incomplete command|error: ?unrecognized command|unknown command\.?$|syntax error)";

/// Terminal control sequences and backspaces left behind by pagers
const TERMINAL_NOISE: &str =
    r"\x1b\[[0-9]+D +\x1b\[[0-9]+D|\x08+ +\x08+|\x1b\[[0-9;?]*[A-Za-z]|\x08+";

/// How many leading output lines are inspected for a command error
const ERROR_SCAN_LINES: usize = 3;

/// Compiled patterns for one vendor profile
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub prompt: Regex,
    pub pager: Regex,
    pub username: Regex,
    pub password: Regex,
    pub login_failure: Regex,
    command_error: Regex,
    noise: Regex,
}

impl PromptSet {
    /// # Errors
    ///
    /// `Pattern` if a profile pattern does not compile.
    pub fn for_profile(profile: &VendorProfile) -> Result<Self, AdapterError> {
        Ok(Self {
            prompt: Regex::new(profile.prompt_pattern)?,
            pager: Regex::new(PAGER_PATTERN)?,
            username: Regex::new(USERNAME_PROMPT)?,
            password: Regex::new(PASSWORD_PROMPT)?,
            login_failure: Regex::new(LOGIN_FAILURE)?,
            command_error: Regex::new(COMMAND_ERROR)?,
            noise: Regex::new(TERMINAL_NOISE)?,
        })
    }

    /// Index of the first pattern matching at the end of `buf`
    pub fn match_at_end(&self, buf: &[u8], patterns: &[&Regex]) -> Option<usize> {
        let tail = tail(buf);
        patterns.iter().position(|re| re.is_match(tail))
    }

    /// Byte offset in `buf` where a trailing pager prompt starts
    pub fn pager_at_end(&self, buf: &[u8]) -> Option<usize> {
        let offset = tail_start(buf);
        self.pager
            .find(&buf[offset..])
            .map(|m| offset + m.start())
    }

    /// True when the prompt ends in `>` (Cisco-like user EXEC)
    pub fn is_unprivileged(&self, buf: &[u8]) -> bool {
        buf.iter()
            .rev()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'>')
    }

    pub fn login_failed(&self, buf: &[u8]) -> bool {
        self.login_failure.is_match(buf)
    }

    /// Remove the command echo, the trailing prompt and terminal noise
    ///
    /// Line endings are normalised to `\n`.
    pub fn clean_output(&self, raw: &[u8], command: &str) -> Vec<u8> {
        let without_noise = self.noise.replace_all(raw, &b""[..]);
        let mut text: Vec<u8> = Vec::with_capacity(without_noise.len());
        let mut iter = without_noise.iter().peekable();
        while let Some(&b) = iter.next() {
            if b == b'\r' {
                if iter.peek() == Some(&&b'\n') {
                    continue;
                }
                // lone CR after a blanked pager line: drop the blanks
                let line_start = text.iter().rposition(|c| *c == b'\n').map_or(0, |p| p + 1);
                if text[line_start..].iter().all(u8::is_ascii_whitespace) {
                    text.truncate(line_start);
                }
                continue;
            }
            text.push(b);
        }

        let mut lines: Vec<&[u8]> = text.split(|b| *b == b'\n').collect();

        // echo: first non-empty line containing the command
        if let Some(first) = lines.iter().position(|l| !l.iter().all(u8::is_ascii_whitespace)) {
            if contains(lines[first], command.as_bytes()) {
                lines.drain(..=first);
            }
        }

        // trailing prompt line
        pop_blank_lines(&mut lines);
        if lines
            .last()
            .is_some_and(|l| self.prompt.is_match(&[&b"\n"[..], *l].concat()))
        {
            lines.pop();
            pop_blank_lines(&mut lines);
        }

        let mut out = lines.join(&b'\n');
        if !out.is_empty() {
            out.push(b'\n');
        }
        out
    }

    /// The device's error line, if its output starts with one
    pub fn command_error(&self, output: &[u8]) -> Option<String> {
        output
            .split(|b| *b == b'\n')
            .filter(|l| !l.iter().all(u8::is_ascii_whitespace))
            .take(ERROR_SCAN_LINES)
            .find(|l| self.command_error.is_match(l))
            .map(|l| String::from_utf8_lossy(l).trim().to_string())
    }
}

fn pop_blank_lines(lines: &mut Vec<&[u8]>) {
    while lines
        .last()
        .is_some_and(|l| l.iter().all(u8::is_ascii_whitespace))
    {
        lines.pop();
    }
}

fn tail_start(buf: &[u8]) -> usize {
    let window_start = buf.len().saturating_sub(TAIL_WINDOW);
    buf[..window_start]
        .iter()
        .rposition(|b| *b == b'\n')
        .unwrap_or(0)
}

fn tail(buf: &[u8]) -> &[u8] {
    &buf[tail_start(buf)..]
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
