//! Source rewriting that makes a snippet report itself.
//!
//! Three text-only stages run in a fixed order:
//!
//! 1. [`add_auto_log`] wraps bare top-level expression statements in `log(...)`.
//! 2. [`inject_loop_guards`] makes every braced loop body start with `loopGuard();`.
//! 3. [`prepare`] prepends the runtime shims (`log`, `require`, guarded `Array`).
//!
//! The scanner is a heuristic, not a parser. It tracks strings, template
//! literals, regex literals, comments and bracket nesting well enough to find
//! statement boundaries; anything it is unsure about is left untouched.
//! Known blind spots: templates with backticks nested inside `${}`, and regex
//! literals directly after a keyword such as `return`. `for` and `while`
//! headers match only up to two levels of nested parentheses; a deeper header
//! such as `while (f(g(h(x)))) {` gets no guard and stops only at the
//! engine's own loop limit.

use std::sync::LazyLock;

use regex::Regex;

/// Runtime helpers prepended to every prepared script.
pub const SHIM: &str = r#"function log(...args) { console.log(...args); return args; }
var __loadedModules = {};
function require(name, version) {
  var key = name + '@' + (version || 'latest');
  if (__loadedModules[key]) { return __loadedModules[key].exports; }
  var source = moduleCache.resolve(name, version);
  if (source === undefined || source === null) {
    throw new Error('Module ' + name + ' not found. Make sure to use a valid module name.');
  }
  var module = { exports: {} };
  __loadedModules[key] = module;
  var factory = new Function('module', 'exports', 'require', 'console', source);
  factory(module, module.exports, require, console);
  return module.exports;
}
var Array = (function (NativeArray) {
  function Array(...args) {
    if (args.length === 1 && typeof args[0] === 'number') { arrayGuard(args[0]); }
    return Reflect.construct(NativeArray, args, new.target || NativeArray);
  }
  Object.setPrototypeOf(Array, NativeArray);
  Array.prototype = NativeArray.prototype;
  return Array;
})(globalThis.Array);
"#;

static SKIP_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?:(?:const|let|var|function|class|if|else|for|while|do|switch|case|default|break|continue|return|throw|try|catch|finally|import|export|async|await|yield|delete|void|debugger|with|new|typeof|instanceof|this|super|console)\b|log\s*\(|//|/\*|<|>|[{})\]]|'use strict'|"use strict"|[A-Za-z_$][\w$]*\s*:[^:])"#,
    )
    .expect("Invalid regex")
});

static FOR_LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfor\s*\(((?:[^()]|\((?:[^()]|\([^()]*\))*\))*)\)\s*\{").expect("Invalid regex")
});

static WHILE_LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bwhile\s*\(((?:[^()]|\((?:[^()]|\([^()]*\))*\))*)\)\s*\{").expect("Invalid regex")
});

static DO_LOOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdo\s*\{").expect("Invalid regex"));

/// Line prefixes that mark a continuation of the previous line.
const CONTINUATION_PREFIXES: &[&str] = &[".", "?", ":", ",", "*", "&&", "||", "="];

/// Run all three stages.
pub fn prepare(source: &str) -> String {
    let instrumented = inject_loop_guards(&add_auto_log(source));
    format!("{SHIM}{instrumented}\n")
}

/// Insert `loopGuard();` as the first statement of braced loop bodies.
pub fn inject_loop_guards(source: &str) -> String {
    let source = FOR_LOOP.replace_all(source, "for (${1}) { loopGuard();");
    let source = WHILE_LOOP.replace_all(&source, "while (${1}) { loopGuard();");
    DO_LOOP.replace_all(&source, "do { loopGuard();").into_owned()
}

/// Wrap bare top-level expression statements in `log(...)`.
pub fn add_auto_log(source: &str) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut scanner = Scanner::default();
    let mut previous_code: Option<String> = None;
    let mut output = Vec::with_capacity(lines.len());

    for (index, raw) in lines.iter().enumerate() {
        let (line, line_end) = match raw.strip_suffix('\r') {
            Some(line) => (line, "\r"),
            None => (*raw, ""),
        };

        let started_nested = scanner.state.is_nested();
        let scanned = scanner.scan_line(line);
        let ended_nested = scanner.state.is_nested();

        let rewritten = if started_nested || ended_nested || line.trim().is_empty() {
            None
        } else if is_continuation(line, previous_code.as_deref(), next_code_line(&lines, index)) {
            None
        } else {
            scanned.rewrite()
        };

        match rewritten {
            Some(rewritten) => output.push(format!("{rewritten}{line_end}")),
            None => output.push(raw.to_string()),
        }

        let code = scanned.code();
        if !code.trim().is_empty() {
            previous_code = Some(code);
        }
    }

    output.join("\n")
}

/// Check whether a line belongs to a statement spanning several lines.
fn is_continuation(line: &str, previous: Option<&str>, next: Option<&str>) -> bool {
    starts_with_continuation(line)
        || previous.is_some_and(ends_with_operator)
        || next.is_some_and(starts_with_continuation)
}

fn starts_with_continuation(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("...") {
        return false;
    }
    CONTINUATION_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

fn ends_with_operator(code: &str) -> bool {
    let code = code.trim_end();
    if code.ends_with("++") || code.ends_with("--") || code.ends_with("*/") {
        return false;
    }
    code.chars().last().is_some_and(|last| {
        matches!(
            last,
            '+' | '-' | '*' | '/' | '%' | '=' | '&' | '|' | '^' | '<' | '>' | '?' | ':' | ',' | '!' | '~' | '.'
        )
    })
}

fn next_code_line<'a>(lines: &[&'a str], index: usize) -> Option<&'a str> {
    lines[index + 1..]
        .iter()
        .copied()
        .find(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with("//")
        })
}

/// Scanner state carried from one line to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ScanState {
    parens: i32,
    braces: i32,
    brackets: i32,
    block_comment: bool,
    template: bool,
}

impl ScanState {
    fn is_nested(&self) -> bool {
        self.parens != 0
            || self.braces != 0
            || self.brackets != 0
            || self.block_comment
            || self.template
    }

    fn at_top_level(&self) -> bool {
        self.parens == 0 && self.braces == 0 && self.brackets == 0
    }
}

/// One `;`-separated piece of a line.
#[derive(Debug, Default)]
struct Segment {
    text: String,
    terminated: bool,
    assigns: bool,
    arrow: bool,
}

impl Segment {
    fn wrap(&self) -> Option<String> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() || self.assigns || self.arrow || is_update(trimmed) {
            return None;
        }
        if SKIP_STATEMENT.is_match(trimmed) || trimmed.ends_with(':') {
            return None;
        }
        let leading = &self.text[..self.text.len() - self.text.trim_start().len()];
        let trailing = &self.text[self.text.trim_end().len()..];
        Some(format!("{leading}log({trimmed});{trailing}"))
    }

    fn original(&self) -> String {
        if self.terminated {
            format!("{};", self.text)
        } else {
            self.text.clone()
        }
    }
}

fn is_update(statement: &str) -> bool {
    statement.starts_with("++")
        || statement.starts_with("--")
        || statement.ends_with("++")
        || statement.ends_with("--")
}

#[derive(Debug, Default)]
struct ScannedLine {
    segments: Vec<Segment>,
    comment: Option<String>,
}

impl ScannedLine {
    /// The line with its statements wrapped, or `None` when nothing changed.
    fn rewrite(&self) -> Option<String> {
        let mut changed = false;
        let mut text = String::new();
        for segment in &self.segments {
            match segment.wrap() {
                Some(wrapped) => {
                    changed = true;
                    text.push_str(&wrapped);
                }
                None => text.push_str(&segment.original()),
            }
        }
        if let Some(comment) = &self.comment {
            text.push_str(comment);
        }
        changed.then_some(text)
    }

    /// The line without its trailing line comment.
    fn code(&self) -> String {
        self.segments.iter().map(Segment::original).collect()
    }
}

#[derive(Debug, Default)]
struct Scanner {
    state: ScanState,
}

impl Scanner {
    fn scan_line(&mut self, line: &str) -> ScannedLine {
        let chars: Vec<char> = line.chars().collect();
        let mut scanned = ScannedLine::default();
        let mut segment = Segment::default();
        let mut quote: Option<char> = None;
        let mut regex = false;
        let mut regex_class = false;
        let mut previous: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if self.state.block_comment {
                segment.text.push(c);
                if c == '*' && next == Some('/') {
                    segment.text.push('/');
                    self.state.block_comment = false;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }

            if self.state.template || quote.is_some() || regex {
                segment.text.push(c);
                if c == '\\' {
                    if let Some(escaped) = next {
                        segment.text.push(escaped);
                        i += 2;
                        continue;
                    }
                } else if self.state.template && c == '`' {
                    self.state.template = false;
                    previous = Some(c);
                } else if quote == Some(c) {
                    quote = None;
                    previous = Some(c);
                } else if regex {
                    match c {
                        '[' => regex_class = true,
                        ']' => regex_class = false,
                        '/' if !regex_class => {
                            regex = false;
                            previous = Some(c);
                        }
                        _ => {}
                    }
                }
                i += 1;
                continue;
            }

            match c {
                '/' if next == Some('/') => {
                    scanned.comment = Some(chars[i..].iter().collect());
                    break;
                }
                '/' if next == Some('*') => {
                    self.state.block_comment = true;
                    segment.text.push_str("/*");
                    i += 2;
                    continue;
                }
                '/' if starts_regex(previous) => {
                    regex = true;
                    regex_class = false;
                }
                '\'' | '"' => quote = Some(c),
                '`' => self.state.template = true,
                '(' => self.state.parens += 1,
                ')' => self.state.parens -= 1,
                '{' => self.state.braces += 1,
                '}' => self.state.braces -= 1,
                '[' => self.state.brackets += 1,
                ']' => self.state.brackets -= 1,
                ';' if self.state.at_top_level() => {
                    segment.terminated = true;
                    scanned.segments.push(std::mem::take(&mut segment));
                    previous = Some(c);
                    i += 1;
                    continue;
                }
                '=' if self.state.at_top_level() => {
                    let before = i.checked_sub(1).map(|j| chars[j]);
                    if next == Some('>') {
                        segment.arrow = true;
                    } else if next != Some('=') && !matches!(before, Some('=' | '!' | '<' | '>')) {
                        segment.assigns = true;
                    }
                }
                _ => {}
            }

            segment.text.push(c);
            if !c.is_whitespace() {
                previous = Some(c);
            }
            i += 1;
        }

        if !segment.text.trim().is_empty() || scanned.segments.is_empty() {
            scanned.segments.push(segment);
        }
        scanned
    }
}

/// A `/` starts a regex literal unless it follows an operand.
fn starts_regex(previous: Option<char>) -> bool {
    match previous {
        None => true,
        Some(c) => !(c.is_alphanumeric() || matches!(c, '_' | '$' | ')' | ']' | '}' | '\'' | '"' | '`')),
    }
}
