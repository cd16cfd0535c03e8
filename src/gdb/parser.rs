//! GDB Console Output Parser
//!
//! Frames the raw, prompt-delimited console stream into responses and parses
//! the handful of output shapes the dispatch layer needs: breakpoint tables,
//! memory dumps and `print` values.

use crate::gdb::error::DispatchError;
use crate::gdb::types::{Breakpoint, MemoryDump};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

/// Splits the unframed console stream into prompt-terminated frames
#[derive(Debug, Clone)]
pub struct ResponseBuffer {
    prompt: String,
    pending: String,
}

impl ResponseBuffer {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            pending: String::new(),
        }
    }

    /// Append newly arrived text and return every frame it completes.
    ///
    /// A frame is the text before a prompt that starts a line.
    pub fn push(&mut self, text: &str) -> Vec<Vec<String>> {
        self.pending.push_str(text);

        let mut frames = Vec::new();
        while let Some(pos) = self.find_prompt() {
            frames.push(split_lines(&self.pending[..pos]));
            self.pending.drain(..pos + self.prompt.len());
        }
        frames
    }

    /// Drop complete lines that arrived outside any request
    pub fn drain_unsolicited(&mut self) -> Vec<String> {
        match self.pending.rfind('\n') {
            Some(end) => {
                let lines = split_lines(&self.pending[..end]);
                self.pending.drain(..=end);
                lines
            }
            None => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn find_prompt(&self) -> Option<usize> {
        if self.prompt.is_empty() {
            return None;
        }
        let mut from = 0;
        while let Some(rel) = self.pending[from..].find(&self.prompt) {
            let idx = from + rel;
            if idx == 0 || self.pending[..idx].ends_with('\n') {
                return Some(idx);
            }
            from = idx + self.prompt.len();
        }
        None
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:0x[0-9a-fA-F]+(?:\s+<[^>]*>)?:\s*)?",
        r"(No symbol|Cannot access memory at address|The program is not being run\.",
        r"|No breakpoint number|A syntax error in expression|Undefined command:",
        r"|No symbol table is loaded\.|Invalid number|Attempt to take address of value not located in memory\.",
        r"|Argument required|History has not yet reached|No frame selected\.)"
    ))
    .expect("error line pattern")
});

/// Turn one frame into the terminal response for `command`.
///
/// Strips a terminal echo of the command and trailing blank lines. A known
/// gdb error line (optionally behind the address column `x` prints) turns the
/// whole response into a `Debugger` error carrying that line verbatim.
pub fn classify_response(command: &str, mut lines: Vec<String>) -> Result<Vec<String>, DispatchError> {
    if lines
        .first()
        .is_some_and(|first| first.trim() == command.trim())
    {
        lines.remove(0);
    }
    while lines.last().is_some_and(|last| last.trim().is_empty()) {
        lines.pop();
    }

    if let Some(error) = lines.iter().find(|line| ERROR_LINE.is_match(line.trim_start())) {
        debug!("Debugger reported error for '{}': {}", command, error);
        return Err(DispatchError::Debugger(error.trim().to_string()));
    }

    Ok(lines)
}

// Num     Type           Disp Enb Address            What
// 1       breakpoint     keep y   0x0000000000001139 in main at test.c:5
static BREAKPOINT_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\s+(.+?)\s+(keep|del|dis|dstp)\s+([yn])\s+(.*)$").expect("breakpoint row pattern")
});

// Locations of a `<MULTIPLE>` breakpoint:
// 1.1                         y   0x0000000000001139 in f at a.h:3
static BREAKPOINT_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.\d+\s+([yn])\s+(.*)$").expect("breakpoint location row pattern")
});

static BREAKPOINT_WHAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(0x[0-9a-fA-F]+|<[A-Z]+>)\s+)?(?:in\s+(.+?)\s+at\s+)?(\S+):(\d+)\s*$")
        .expect("breakpoint location pattern")
});

/// Parse `info breakpoints` output.
///
/// A breakpoint with several locations yields one entry per `N.M` location
/// row, each carrying the parent number and the location's own enabled flag.
/// Rows without a `file:line` location (watchpoints, catchpoints, the
/// `<MULTIPLE>` parent) and the indented detail lines are skipped.
/// "No breakpoints or watchpoints." yields an empty list.
pub fn parse_breakpoints(lines: &[String]) -> Vec<Breakpoint> {
    let mut breakpoints = Vec::new();

    for line in lines {
        let line = line.trim();
        let (num, enabled, what) = if let Some(row) = BREAKPOINT_ROW.captures(line) {
            (row.get(1), row.get(4), row.get(5))
        } else if let Some(loc) = BREAKPOINT_LOCATION.captures(line) {
            (loc.get(1), loc.get(2), loc.get(3))
        } else {
            continue;
        };
        let (Some(num), Some(enabled), Some(what)) = (num, enabled, what) else {
            continue;
        };
        let Ok(num) = num.as_str().parse::<u32>() else {
            continue;
        };
        let Some(location) = BREAKPOINT_WHAT.captures(what.as_str().trim()) else {
            debug!("Skipping breakpoint row without file:line: {}", line);
            continue;
        };
        let Ok(line_no) = location[4].parse::<u32>() else {
            continue;
        };

        breakpoints.push(Breakpoint {
            num,
            file: location[3].to_string(),
            line: line_no,
            enabled: enabled.as_str() == "y",
            function: location.get(2).map(|m| m.as_str().to_string()),
            address: location.get(1).map(|m| m.as_str().to_string()),
        });
    }

    debug!("Parsed {} breakpoints", breakpoints.len());
    breakpoints
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Find the breakpoint at `file:line`.
///
/// Files match on their trailing component, so an absolute path reported by
/// gdb still matches a relative one from the caller.
pub fn find_breakpoint(breakpoints: &[Breakpoint], file: &str, line: u32) -> Option<u32> {
    let wanted = file_name(file);
    breakpoints
        .iter()
        .find(|bp| bp.line == line && file_name(&bp.file) == wanted)
        .map(|bp| bp.num)
}

static BREAKPOINT_CREATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Breakpoint|Temporary breakpoint|Hardware assisted breakpoint) (\d+) at")
        .expect("breakpoint created pattern")
});

/// Number of the breakpoint announced by `break`
pub fn parse_breakpoint_created(lines: &[String]) -> Option<u32> {
    lines
        .iter()
        .find_map(|line| BREAKPOINT_CREATED.captures(line.trim()))
        .and_then(|caps| caps[1].parse().ok())
}

// 0x555555558010 <buf+8>:	0x48	0x65	0x6c
static MEMORY_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*0x([0-9a-fA-F]+)(?:\s+<[^>]*>)?:\s*(.*)$").expect("memory row pattern")
});

/// Parse `x/<n>xb` output into a contiguous dump
pub fn parse_memory_dump(lines: &[String]) -> Option<MemoryDump> {
    let mut address = None;
    let mut bytes = Vec::new();

    for line in lines {
        let Some(row) = MEMORY_ROW.captures(line) else {
            continue;
        };
        let row_address = u64::from_str_radix(&row[1], 16).ok()?;
        address.get_or_insert(row_address);

        for token in row[2].split_whitespace() {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            bytes.push(u8::from_str_radix(digits, 16).ok()?);
        }
    }

    address.map(|address| MemoryDump { address, bytes })
}

static PRINT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$(\d+)\s*=\s?(.*)$").expect("print value pattern"));

/// Split `$N = value` into the history index and the value text
pub fn parse_print_value(lines: &[String]) -> (Option<u32>, String) {
    let Some((first, rest)) = lines.split_first() else {
        return (None, String::new());
    };

    match PRINT_VALUE.captures(first) {
        Some(caps) => {
            let mut value = caps[2].to_string();
            for line in rest {
                value.push('\n');
                value.push_str(line);
            }
            (caps[1].parse().ok(), value)
        }
        None => (None, lines.join("\n")),
    }
}

static ADDRESS_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("address pattern"));

/// First address literal in the value of `print &expr`
pub fn extract_address(lines: &[String]) -> Option<u64> {
    let (_, value) = parse_print_value(lines);
    let literal = ADDRESS_LITERAL.find(&value)?;
    u64::from_str_radix(&literal.as_str()[2..], 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_buffer_frames_on_prompt() {
        let mut buffer = ResponseBuffer::new("(gdb) ");
        assert!(buffer.push("$1 = 4").is_empty());
        let frames = buffer.push("2\n(gdb) ");
        assert_eq!(frames, vec![vec!["$1 = 42".to_string()]]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_splits_multiple_frames_in_one_chunk() {
        let mut buffer = ResponseBuffer::new("(gdb) ");
        let frames = buffer.push("a\r\nb\n(gdb) c\n(gdb) ");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec!["a", "b"]);
        assert_eq!(frames[1], vec!["c"]);
    }

    #[test]
    fn test_buffer_ignores_prompt_mid_line() {
        let mut buffer = ResponseBuffer::new("(gdb) ");
        assert!(buffer.push("$1 = \"(gdb) \"\n").is_empty());
        let frames = buffer.push("(gdb) ");
        assert_eq!(frames[0], vec!["$1 = \"(gdb) \""]);
    }

    #[test]
    fn test_buffer_drains_unsolicited_lines() {
        let mut buffer = ResponseBuffer::new("(gdb) ");
        buffer.push("hello from inferior\npartial");
        assert_eq!(buffer.drain_unsolicited(), vec!["hello from inferior"]);
        let frames = buffer.push(" line\n(gdb) ");
        assert_eq!(frames[0], vec!["partial line"]);
    }

    #[test]
    fn test_classify_strips_echo_and_detects_errors() {
        let ok = classify_response("print x", lines("print x\n$1 = 5\n\n")).unwrap();
        assert_eq!(ok, vec!["$1 = 5"]);

        let err = classify_response("print nope", lines("No symbol \"nope\" in current context.")).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Debugger("No symbol \"nope\" in current context.".to_string())
        );

        let err = classify_response(
            "x/16xb 0xdeadbeef",
            lines("0xdeadbeef:\tCannot access memory at address 0xdeadbeef"),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "0xdeadbeef:\tCannot access memory at address 0xdeadbeef");

        let ok = classify_response("print msg", lines("$2 = \"No symbol here\""));
        assert!(ok.is_ok(), "error text inside a value is not an error");

        let err = classify_response("x/4xb 0", lines("Cannot access memory at address 0x0")).unwrap_err();
        assert!(matches!(err, DispatchError::Debugger(_)));
    }

    #[test]
    fn test_parse_breakpoints_table() {
        let output = lines(
            "Num     Type           Disp Enb Address            What\n\
             1       breakpoint     keep y   0x0000000000001139 in main at /home/me/src/test.c:5\n\
             \tbreakpoint already hit 1 time\n\
             2       breakpoint     keep n   0x0000000000001150 in helper at util.c:12\n\
             3       breakpoint     keep y   <PENDING>          lib.c:40\n\
             4       breakpoint     keep n   main.c:7\n\
             5       hw watchpoint  keep y                      counter",
        );
        let bps = parse_breakpoints(&output);
        assert_eq!(bps.len(), 4);

        assert_eq!(bps[0].num, 1);
        assert_eq!(bps[0].file, "/home/me/src/test.c");
        assert_eq!(bps[0].line, 5);
        assert!(bps[0].enabled);
        assert_eq!(bps[0].function.as_deref(), Some("main"));

        assert!(!bps[1].enabled);
        assert_eq!(bps[2].address.as_deref(), Some("<PENDING>"));
        assert_eq!(bps[3].file, "main.c");
        assert!(!bps[3].enabled);
    }

    #[test]
    fn test_parse_breakpoints_multiple_locations() {
        let output = lines(
            "Num     Type           Disp Enb Address            What\n\
             1       breakpoint     keep y   <MULTIPLE>         \n\
             1.1                         y   0x0000000000001139 in f<int> at a.h:3\n\
             1.2                         n   0x0000000000001180 in f<long> at a.h:3\n\
             2       breakpoint     keep y   0x00000000000011a0 in main at main.c:9",
        );
        let bps = parse_breakpoints(&output);
        assert_eq!(bps.len(), 3);

        assert_eq!((bps[0].num, bps[0].line), (1, 3));
        assert_eq!(bps[0].file, "a.h");
        assert!(bps[0].enabled);
        assert_eq!(bps[0].function.as_deref(), Some("f<int>"));
        assert_eq!(bps[1].num, 1);
        assert!(!bps[1].enabled);
        assert_eq!(bps[1].address.as_deref(), Some("0x0000000000001180"));
        assert_eq!(bps[2].num, 2);

        assert_eq!(find_breakpoint(&bps, "a.h", 3), Some(1));
        assert_eq!(find_breakpoint(&bps, "src/main.c", 9), Some(2));
    }

    #[test]
    fn test_parse_breakpoints_empty_sentinel() {
        assert!(parse_breakpoints(&lines("No breakpoints or watchpoints.")).is_empty());
        assert!(parse_breakpoints(&[]).is_empty());
    }

    #[test]
    fn test_find_breakpoint_matches_file_suffix() {
        let bps = parse_breakpoints(&lines(
            "Num     Type           Disp Enb Address            What\n\
             1       breakpoint     keep y   0x0000000000001139 in main at /home/me/src/test.c:5\n\
             2       breakpoint     keep y   0x0000000000001150 in other at /tmp/test.c:5",
        ));
        assert_eq!(find_breakpoint(&bps, "test.c", 5), Some(1));
        assert_eq!(find_breakpoint(&bps, "src/test.c", 5), Some(1));
        assert_eq!(find_breakpoint(&bps, "test.c", 6), None);
        assert_eq!(find_breakpoint(&bps, "best.c", 5), None);
    }

    #[test]
    fn test_parse_breakpoint_created() {
        let out = lines("Breakpoint 3 at 0x1139: file test.c, line 5.");
        assert_eq!(parse_breakpoint_created(&out), Some(3));
        assert_eq!(parse_breakpoint_created(&lines("Function \"nope\" not defined.")), None);
    }

    #[test]
    fn test_parse_memory_dump() {
        let out = lines(
            "0x555555558010 <buf>:\t0x48\t0x65\t0x6c\t0x6c\n\
             0x555555558014 <buf+4>:\t0x6f\t0x00",
        );
        let dump = parse_memory_dump(&out).unwrap();
        assert_eq!(dump.address, 0x555555558010);
        assert_eq!(dump.bytes, b"Hello\0");

        assert!(parse_memory_dump(&lines("nothing here")).is_none());
    }

    #[test]
    fn test_parse_print_value() {
        assert_eq!(parse_print_value(&lines("$3 = 42")), (Some(3), "42".to_string()));
        let (idx, value) = parse_print_value(&lines("$4 = {a = 1,\n  b = 2}"));
        assert_eq!(idx, Some(4));
        assert_eq!(value, "{a = 1,\n  b = 2}");
    }

    #[test]
    fn test_extract_address() {
        assert_eq!(extract_address(&lines("$1 = (int *) 0x7ffe1234")), Some(0x7ffe1234));
        assert_eq!(
            extract_address(&lines("$2 = (char (*)[16]) 0x4010 <buf>")),
            Some(0x4010)
        );
        assert_eq!(extract_address(&lines("$3 = 12")), None);
    }
}
