//! Input validation and normalization
//!
//! Everything in here is pure: no I/O, no state. Validators return values and
//! never panic, so callers can feed them raw user input.

use crate::gdb::types::ValidationResult;
use std::str::FromStr;

/// A rejected input, with an optional safe alternative to offer the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub error: String,
    pub suggestion: Option<String>,
}

impl Rejection {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            suggestion: None,
        }
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Kinds accepted by [`validate_input`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Address,
    Expression,
    Hex,
    Command,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Address => "address",
            InputKind::Expression => "expression",
            InputKind::Hex => "hex",
            InputKind::Command => "command",
        }
    }
}

impl FromStr for InputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "address" => Ok(InputKind::Address),
            "expression" => Ok(InputKind::Expression),
            "hex" => Ok(InputKind::Hex),
            "command" => Ok(InputKind::Command),
            other => Err(format!("unknown input type: {}", other)),
        }
    }
}

/// Single entry point for validating user input of a given kind.
///
/// An unrecognized `kind` is always rejected.
pub fn validate_input(kind: &str, value: &str) -> ValidationResult {
    let kind = match kind.parse::<InputKind>() {
        Ok(kind) => kind,
        Err(e) => return ValidationResult::invalid(e),
    };

    match kind {
        InputKind::Address => match normalize_address(value) {
            Ok(normalized) => ValidationResult::ok(normalized),
            Err(e) => ValidationResult::invalid(e),
        },
        InputKind::Expression => match validate_expression_with_hints(value) {
            Ok(hint) => ValidationResult::ok(value.trim()).with_hint(hint),
            Err(e) => ValidationResult::invalid(e),
        },
        InputKind::Hex => match normalize_hex_value(value) {
            Ok(normalized) => ValidationResult::ok(normalized),
            Err(r) => ValidationResult::invalid(r.error).with_hint(r.suggestion),
        },
        InputKind::Command => match validate_gdb_command_with_suggestions(value) {
            Ok(suggestion) => ValidationResult::ok(value.trim()).with_hint(suggestion),
            Err(r) => ValidationResult::invalid(r.error).with_hint(r.suggestion),
        },
    }
}

fn is_address_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '>' | '[' | ']')
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

fn canonical_hex(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", trimmed.to_ascii_lowercase())
    }
}

/// Unprefixed hex: every character a hex digit and at least one a letter.
/// All-decimal tokens were already taken as decimal.
fn is_bare_hex(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_hexdigit())
        && !s.chars().all(|c| c.is_ascii_digit())
}

/// Normalize an address: hex and decimal literals become canonical
/// lowercase `0x` hex, identifier-like expressions pass through verbatim.
pub fn normalize_address(input: &str) -> Result<String, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("Address cannot be empty".to_string());
    }

    if let Some(bad) = s.chars().find(|c| !is_address_char(*c)) {
        return Err(format!("Invalid character '{}' in address '{}'", bad, s));
    }

    if let Some(digits) = strip_hex_prefix(s) {
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Invalid hex address '{}'", s));
        }
        return Ok(canonical_hex(digits));
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .map(|n| format!("{:#x}", n))
            .map_err(|_| format!("Decimal address '{}' does not fit in 64 bits", s));
    }

    if is_bare_hex(s) {
        return Ok(canonical_hex(s));
    }

    match s.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => Ok(s.to_string()),
        _ => Err(format!("'{}' is neither an address nor a symbol", s)),
    }
}

/// Parse the literal produced by [`normalize_address`]; `None` for symbols
pub fn parse_address_literal(normalized: &str) -> Option<u64> {
    let digits = strip_hex_prefix(normalized)?;
    u64::from_str_radix(digits, 16).ok()
}

/// Check an expression for emptiness and balanced parentheses.
///
/// On success returns an advisory hint for pointer dereferences and array
/// indexing; hints never reject.
pub fn validate_expression_with_hints(input: &str) -> Result<Option<String>, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("Expression cannot be empty".to_string());
    }

    let mut depth: i64 = 0;
    for (pos, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!(
                        "Unbalanced parentheses: unexpected ')' at position {}",
                        pos
                    ));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("Unbalanced parentheses: {} unclosed '('", depth));
    }

    let mut hints = Vec::new();
    if s.contains("->") {
        hints.push("pointer dereference: the pointer must be valid in the current frame");
    }
    if let Some(open) = s.find('[') {
        if s[open..].contains(']') {
            hints.push("array indexing: indices are not bounds-checked by gdb");
        }
    }

    if hints.is_empty() {
        Ok(None)
    } else {
        Ok(Some(hints.join("; ")))
    }
}

/// Normalize a hex value to `0x`-prefixed, even-length digits.
///
/// Digit case is kept as supplied.
pub fn normalize_hex_value(input: &str) -> Result<String, Rejection> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Rejection::new("Hex value cannot be empty").suggest("Enter a value such as 0xFF"));
    }

    let digits = strip_hex_prefix(s).unwrap_or(s);
    if digits.is_empty() {
        return Err(Rejection::new(format!("Hex value '{}' has no digits", s))
            .suggest("Add digits after the prefix, e.g. 0x0F"));
    }

    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(
            Rejection::new(format!("Invalid hex digit '{}' in '{}'", bad, s))
                .suggest("Use digits 0-9 and A-F, e.g. 0xFF"),
        );
    }

    if digits.len() % 2 == 1 {
        Ok(format!("0x0{}", digits))
    } else {
        Ok(format!("0x{}", digits))
    }
}

/// Whether `word` is an abbreviation gdb would accept for `full`
fn abbreviates(word: &str, full: &str, min: usize) -> bool {
    word.len() >= min && full.starts_with(word)
}

/// Commands that end or destructively alter the session
fn denied(verb: &str, args: &str) -> Option<Rejection> {
    if abbreviates(verb, "quit", 1) || verb == "exit" {
        return Some(
            Rejection::new(format!("'{}' would end the debugger session", verb))
                .suggest("Stop the session from the host (gdb_stop) instead"),
        );
    }
    if abbreviates(verb, "kill", 1) {
        return Some(
            Rejection::new(format!("'{}' would terminate the debugged program", verb))
                .suggest("Use 'interrupt' to pause the program instead"),
        );
    }
    if abbreviates(verb, "detach", 3) {
        return Some(
            Rejection::new(format!("'{}' would release the debugged program", verb))
                .suggest("Use 'interrupt' to pause the program instead"),
        );
    }
    // `delete breakpoints` with no numbers clears the table just like bare `delete`
    let clears_all = args.is_empty() || abbreviates(args, "breakpoints", 2);
    if abbreviates(verb, "delete", 1) && clears_all {
        return Some(
            Rejection::new("'delete' without arguments removes every breakpoint")
                .suggest("Name the breakpoint to remove: delete <N>"),
        );
    }
    None
}

/// Usage line for verbs that need an argument
fn usage(verb: &str) -> Option<&'static str> {
    match verb {
        "print" | "p" => Some("print <expression>"),
        "x" => Some("x/16xb <address>"),
        "break" | "b" | "tbreak" => Some("break <file>:<line> or break <function>"),
        "watch" | "rwatch" | "awatch" => Some("watch <expression>"),
        "display" => Some("display <expression>"),
        "set" => Some("set variable <name> = <value>"),
        "ptype" | "whatis" => Some("ptype <expression>"),
        "info" | "i" => Some("info breakpoints | locals | registers | frame"),
        "list" | "l" => Some("list <function> or list <file>:<line>"),
        _ => None,
    }
}

/// Screen a raw debugger command.
///
/// Deny-listed commands are rejected with a safe alternative. Known verbs
/// missing their argument are accepted with a completion suggestion. Anything
/// else passes silently.
pub fn validate_gdb_command_with_suggestions(input: &str) -> Result<Option<String>, Rejection> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Rejection::new("Command cannot be empty").suggest("Try 'info breakpoints'"));
    }

    let (verb, rest) = match s.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (s, ""),
    };
    // `x/16xb` and `print/x` carry their format after a slash
    let base = verb.split('/').next().unwrap_or(verb);

    if let Some(rejection) = denied(base, rest) {
        return Err(rejection);
    }

    if rest.is_empty() {
        if let Some(usage) = usage(base) {
            return Ok(Some(format!("'{}' expects an argument: {}", base, usage)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_addresses_become_hex() {
        assert_eq!(normalize_address("1234").unwrap(), "0x4d2");
        assert_eq!(normalize_address("0").unwrap(), "0x0");
        assert_eq!(normalize_address(" 4096 ").unwrap(), "0x1000");
        for n in [1u64, 255, 65535, 0xdead_beef, u64::MAX] {
            assert_eq!(normalize_address(&n.to_string()).unwrap(), format!("{:#x}", n));
        }
    }

    #[test]
    fn test_hex_addresses_are_canonical() {
        assert_eq!(normalize_address("0xDEADBEEF").unwrap(), "0xdeadbeef");
        assert_eq!(normalize_address("0X00ff").unwrap(), "0xff");
        assert_eq!(normalize_address("7ffe12ab").unwrap(), "0x7ffe12ab");
        assert_eq!(normalize_address("deadbeef").unwrap(), "0xdeadbeef");
        assert_eq!(normalize_address("ff").unwrap(), "0xff");
        assert_eq!(normalize_address("DEAD").unwrap(), "0xdead");
        assert_eq!(parse_address_literal(&normalize_address("ff").unwrap()), Some(0xff));
    }

    #[test]
    fn test_symbolic_addresses_pass_through() {
        assert_eq!(normalize_address("buf").unwrap(), "buf");
        assert_eq!(normalize_address("ctx->regs[3]").unwrap(), "ctx->regs[3]");
        assert_eq!(normalize_address("state.head").unwrap(), "state.head");
        assert_eq!(normalize_address("counter").unwrap(), "counter");
        assert_eq!(normalize_address("_start").unwrap(), "_start");
    }

    #[test]
    fn test_address_rejections() {
        assert!(normalize_address("").is_err());
        assert!(normalize_address("   ").is_err());
        assert!(normalize_address("buf + 4").is_err());
        assert!(normalize_address("*ptr").is_err());
        assert!(normalize_address("0x").is_err());
        assert!(normalize_address("0xzz").is_err());
        assert!(normalize_address("12g").is_err());
        assert!(normalize_address("99999999999999999999999").is_err());
    }

    #[test]
    fn test_normalize_address_is_idempotent() {
        for input in ["1234", "0xABC", "ff00", "buf", "a->b[2]", "0x0000"] {
            let once = normalize_address(input).unwrap();
            assert_eq!(normalize_address(&once).unwrap(), once, "input {}", input);
        }
    }

    #[test]
    fn test_parse_address_literal() {
        assert_eq!(parse_address_literal("0x4d2"), Some(1234));
        assert_eq!(parse_address_literal("buf"), None);
    }

    #[test]
    fn test_expression_balance() {
        assert_eq!(validate_expression_with_hints("x + 1"), Ok(None));
        assert!(validate_expression_with_hints("").is_err());
        assert!(validate_expression_with_hints("(a + b").is_err());
        assert!(validate_expression_with_hints("a + b)").is_err());
        // depth never goes negative, even if the total balances
        assert!(validate_expression_with_hints(")a(").is_err());
        assert_eq!(validate_expression_with_hints("f((a), (b))"), Ok(None));
    }

    #[test]
    fn test_expression_hints_are_advisory() {
        let hint = validate_expression_with_hints("node->next").unwrap().unwrap();
        assert!(hint.contains("pointer dereference"));

        let hint = validate_expression_with_hints("arr[2]").unwrap().unwrap();
        assert!(hint.contains("array indexing"));

        let hint = validate_expression_with_hints("p->items[i]").unwrap().unwrap();
        assert!(hint.contains("pointer dereference") && hint.contains("array indexing"));

        assert_eq!(validate_expression_with_hints("a[").unwrap(), None);
    }

    #[test]
    fn test_hex_value_padding_keeps_case() {
        assert_eq!(normalize_hex_value("F").unwrap(), "0x0F");
        assert_eq!(normalize_hex_value("0xabc").unwrap(), "0x0abc");
        assert_eq!(normalize_hex_value("0XAb").unwrap(), "0xAb");
        assert_eq!(normalize_hex_value("1234").unwrap(), "0x1234");
    }

    #[test]
    fn test_hex_value_rejections() {
        let empty = normalize_hex_value("").unwrap_err();
        assert!(!empty.error.is_empty());

        let bad = normalize_hex_value("XY").unwrap_err();
        assert!(bad.error.contains('X'));
        assert!(bad.suggestion.is_some());

        assert!(normalize_hex_value("0x").is_err());
        assert!(normalize_hex_value("0xG1").is_err());
    }

    #[test]
    fn test_command_deny_list() {
        for cmd in ["quit", "q", "qui", "kill", "k", "detach", "delete"] {
            let rejection = validate_gdb_command_with_suggestions(cmd).unwrap_err();
            assert!(rejection.suggestion.is_some(), "{} should carry a suggestion", cmd);
        }
        assert_eq!(validate_gdb_command_with_suggestions("delete 2"), Ok(None));
    }

    #[test]
    fn test_delete_breakpoints_without_numbers_is_denied() {
        for cmd in ["delete breakpoints", "d br", "del breakpoints", "delete   breakpoint"] {
            assert!(validate_gdb_command_with_suggestions(cmd).is_err(), "{} should be denied", cmd);
        }
        assert_eq!(validate_gdb_command_with_suggestions("delete breakpoints 2"), Ok(None));
        assert_eq!(validate_gdb_command_with_suggestions("d 1 3"), Ok(None));
        assert_eq!(validate_gdb_command_with_suggestions("delete display 1"), Ok(None));
    }

    #[test]
    fn test_incomplete_commands_are_accepted_with_guidance() {
        let suggestion = validate_gdb_command_with_suggestions("print").unwrap().unwrap();
        assert!(suggestion.contains("print <expression>"));

        let suggestion = validate_gdb_command_with_suggestions("x/16xb").unwrap().unwrap();
        assert!(suggestion.contains("<address>"));

        assert_eq!(validate_gdb_command_with_suggestions("print x"), Ok(None));
        assert_eq!(validate_gdb_command_with_suggestions("frobnicate"), Ok(None));
        assert!(validate_gdb_command_with_suggestions("  ").is_err());
    }

    #[test]
    fn test_validate_input_dispatch() {
        let result = validate_input("address", "1234");
        assert!(result.valid);
        assert_eq!(result.normalized.as_deref(), Some("0x4d2"));

        let result = validate_input("hex", "XY");
        assert!(!result.valid);
        assert!(result.normalized.is_none());
        assert!(result.error.is_some());

        let result = validate_input("expression", "p->x");
        assert!(result.valid);
        assert!(result.hint.is_some());

        let result = validate_input("command", "quit");
        assert!(!result.valid);
        assert!(result.hint.is_some());
    }

    #[test]
    fn test_validate_input_unknown_kind() {
        let result = validate_input("register", "rax");
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("unknown input type"));
    }

    #[test]
    fn test_empty_inputs_never_normalize() {
        for kind in ["address", "expression", "hex", "command"] {
            let result = validate_input(kind, "");
            assert!(!result.valid, "{}", kind);
            assert!(result.normalized.is_none());
            assert!(result.error.is_some());
        }
    }
}
