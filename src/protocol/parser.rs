use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

/// A structured instruction found inside free-form text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `[command|<verb>|<arg>...]`
    Command { verb: String, args: Vec<String> },
    /// `[memory|load|<key>]`
    MemoryLoad { key: String },
    /// `[memory|create|<key>|<value...>]`, the value may contain `|`.
    MemoryCreate { key: String, value: String },
}

impl Directive {
    /// The command queue text this directive turns into.
    pub fn command_text(&self) -> String {
        match self {
            Directive::Command { verb, args } if args.is_empty() => verb.clone(),
            Directive::Command { verb, args } => format!("{} {}", verb, args.join(" ")),
            Directive::MemoryLoad { key } => format!("memory-load {}", key),
            Directive::MemoryCreate { key, value } => format!("memory-create {} {}", key, value),
        }
    }

    /// Inert replacement left in the text once the directive has been consumed.
    pub fn marker(&self) -> String {
        let raw = match self {
            Directive::Command { verb, args } => {
                let mut parts = vec![verb.as_str()];
                parts.extend(args.iter().map(String::as_str));
                parts.join("_")
            }
            Directive::MemoryLoad { key } => format!("memory-load_{}", key),
            Directive::MemoryCreate { key, value } => format!("memory-create_{}_{}", key, value),
        };
        let cleaned: String = raw
            .chars()
            .map(|c| match c {
                '[' | ']' | '|' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect();
        format!("processed_{}", cleaned)
    }
}

/// A directive and the byte range it occupied in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveMatch {
    pub range: Range<usize>,
    pub directive: Directive,
}

fn directive_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // The body stops at the first `]`, giving the shortest match from the
    // leftmost opening bracket.
    PATTERN.get_or_init(|| {
        Regex::new(r"\[(command|memory)\|([^\]]*)\]").expect("directive pattern is valid")
    })
}

fn classify(family: &str, body: &str) -> Option<Directive> {
    let parts: Vec<&str> = body.split('|').collect();
    match family {
        "command" => {
            let verb = parts.first()?.trim();
            if verb.is_empty() {
                return None;
            }
            let args = parts[1..]
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect();
            Some(Directive::Command {
                verb: verb.to_string(),
                args,
            })
        }
        "memory" => match parts.as_slice() {
            ["load", rest @ ..] if !rest.is_empty() => {
                let key = rest.join("|").trim().to_string();
                (!key.is_empty()).then_some(Directive::MemoryLoad { key })
            }
            ["create", key, value @ ..] if !value.is_empty() => {
                let key = key.trim();
                let value = value.join("|").trim().to_string();
                (!key.is_empty() && !value.is_empty()).then(|| Directive::MemoryCreate {
                    key: key.to_string(),
                    value,
                })
            }
            _ => None,
        },
        _ => None,
    }
}

/// Lists every directive in the text without modifying it, left to right.
pub fn scan(text: &str) -> Vec<DirectiveMatch> {
    let pattern = directive_pattern();
    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(caps) = pattern.captures_at(text, pos) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => break,
        };
        match classify(&caps[1], &caps[2]) {
            Some(directive) => {
                found.push(DirectiveMatch {
                    range: whole.range(),
                    directive,
                });
                pos = whole.end();
            }
            // Malformed group: resume just past its opening bracket.
            None => pos = whole.start() + 1,
        }
    }
    found
}

/// Replaces every directive with its marker and returns the rewritten text
/// together with the directives in the order they were consumed.
///
/// Each replacement changes the length of the text, so scanning resumes from
/// the end of the inserted marker rather than from precomputed offsets.
pub fn rewrite(text: &str) -> (String, Vec<Directive>) {
    let pattern = directive_pattern();
    let mut out = text.to_string();
    let mut consumed = Vec::new();
    let mut pos = 0;
    loop {
        let (range, directive) = {
            let caps = match pattern.captures_at(&out, pos) {
                Some(caps) => caps,
                None => break,
            };
            let whole = match caps.get(0) {
                Some(m) => m,
                None => break,
            };
            (whole.range(), classify(&caps[1], &caps[2]))
        };
        match directive {
            Some(directive) => {
                let marker = directive.marker();
                out.replace_range(range.clone(), &marker);
                pos = range.start + marker.len();
                consumed.push(directive);
            }
            None => pos = range.start + 1,
        }
    }
    (out, consumed)
}
