//! Shell-style glob matching for wildcard recipient rules
//!
//! Supported syntax: `*` (any run of characters), `?` (one character),
//! `[abc]`, `[a-z]`, `[!a-z]` / `[^a-z]` classes and `\` escapes. A
//! malformed pattern never matches.

/// Pattern syntax error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadPattern;

struct Class {
    negated: bool,
    ranges: Vec<(char, char)>,
    /// Index just past the closing `]`
    end: usize,
}

impl Class {
    fn matches(&self, c: char) -> bool {
        let hit = self.ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
        hit != self.negated
    }
}

fn parse_class(pattern: &[char], start: usize) -> Result<Class, BadPattern> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    loop {
        match pattern.get(i) {
            None => return Err(BadPattern),
            Some(']') if !ranges.is_empty() => {
                return Ok(Class {
                    negated,
                    ranges,
                    end: i + 1,
                })
            }
            Some(']') => return Err(BadPattern),
            _ => {}
        }

        let (lo, next) = class_char(pattern, i)?;
        i = next;
        let mut hi = lo;
        if pattern.get(i) == Some(&'-') && pattern.get(i + 1).is_some_and(|&c| c != ']') {
            let (upper, next) = class_char(pattern, i + 1)?;
            if upper < lo {
                return Err(BadPattern);
            }
            hi = upper;
            i = next;
        }
        ranges.push((lo, hi));
    }
}

fn class_char(pattern: &[char], i: usize) -> Result<(char, usize), BadPattern> {
    match pattern.get(i) {
        Some('\\') => pattern
            .get(i + 1)
            .map(|&c| (c, i + 2))
            .ok_or(BadPattern),
        Some(&c) => Ok((c, i + 1)),
        None => Err(BadPattern),
    }
}

fn validate(pattern: &[char]) -> Result<(), BadPattern> {
    let mut i = 0;
    while i < pattern.len() {
        i = match pattern[i] {
            '[' => parse_class(pattern, i)?.end,
            '\\' if i + 1 < pattern.len() => i + 2,
            '\\' => return Err(BadPattern),
            _ => i + 1,
        };
    }
    Ok(())
}

/// Match `text` against `pattern`
pub fn glob_match(pattern: &str, text: &str) -> Result<bool, BadPattern> {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    validate(&pattern)?;

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it currently absorbs up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => Some(p + 1),
            Some('[') => {
                let class = parse_class(&pattern, p)?;
                class.matches(text[t]).then_some(class.end)
            }
            Some('\\') => (pattern.get(p + 1) == Some(&text[t])).then_some(p + 2),
            Some(&c) => (c == text[t]).then_some(p + 1),
            None => None,
        };

        match (step, backtrack) {
            (Some(next), _) => {
                p = next;
                t += 1;
            }
            (None, Some((star, absorbed))) => {
                p = star + 1;
                t = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            (None, None) => return Ok(false),
        }
    }

    while pattern.get(p) == Some(&'*') {
        p += 1;
    }
    Ok(p == pattern.len())
}
