// Backtracking matcher over the parsed item list.

use crate::lua_pattern::parser::{Item, LuaPattern, Quant};

#[derive(Debug, Clone)]
pub struct Capture {
    pub start: usize,
    pub end: usize,
    /// A `()` position capture: yields start+1 as a number.
    pub position: bool,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Capture>,
}

struct OpenCapture {
    start: usize,
    end: Option<usize>,
    position: bool,
}

struct MatchState<'p, 't> {
    items: &'p [Item],
    text: &'t [u8],
    captures: Vec<OpenCapture>,
}

impl<'p, 't> MatchState<'p, 't> {
    fn single_ok(&self, idx: usize, pos: usize) -> bool {
        if pos >= self.text.len() {
            return false;
        }
        match &self.items[idx] {
            Item::Single(m, _) => m.matches(self.text[pos]),
            _ => false,
        }
    }

    fn do_match(&mut self, idx: usize, pos: usize) -> Option<usize> {
        if idx == self.items.len() {
            return Some(pos);
        }
        match &self.items[idx] {
            Item::Single(_, quant) => match quant {
                Quant::One => {
                    if self.single_ok(idx, pos) {
                        self.do_match(idx + 1, pos + 1)
                    } else {
                        None
                    }
                }
                Quant::Star => self.max_expand(idx, pos),
                Quant::Plus => {
                    if self.single_ok(idx, pos) {
                        self.max_expand(idx, pos + 1)
                    } else {
                        None
                    }
                }
                Quant::Lazy => self.min_expand(idx, pos),
                Quant::Opt => {
                    if self.single_ok(idx, pos) {
                        if let Some(end) = self.do_match(idx + 1, pos + 1) {
                            return Some(end);
                        }
                    }
                    self.do_match(idx + 1, pos)
                }
            },
            Item::CaptureStart { position } => {
                self.captures.push(OpenCapture {
                    start: pos,
                    end: None,
                    position: *position,
                });
                match self.do_match(idx + 1, pos) {
                    Some(end) => Some(end),
                    None => {
                        self.captures.pop();
                        None
                    }
                }
            }
            Item::CaptureEnd => {
                let open = self
                    .captures
                    .iter()
                    .rposition(|c| c.end.is_none())
                    .expect("unbalanced capture");
                self.captures[open].end = Some(pos);
                match self.do_match(idx + 1, pos) {
                    Some(end) => Some(end),
                    None => {
                        self.captures[open].end = None;
                        None
                    }
                }
            }
            Item::Balanced(open, close) => {
                if pos >= self.text.len() || self.text[pos] != *open {
                    return None;
                }
                let mut depth = 1;
                let mut current = pos + 1;
                while current < self.text.len() {
                    let c = self.text[current];
                    current += 1;
                    if c == *close {
                        depth -= 1;
                        if depth == 0 {
                            return self.do_match(idx + 1, current);
                        }
                    } else if c == *open {
                        depth += 1;
                    }
                }
                None
            }
            Item::Backref(n) => {
                let (start, end) = self.closed_capture_span(*n)?;
                let len = end - start;
                if pos + len <= self.text.len()
                    && self.text[pos..pos + len] == self.text[start..end]
                {
                    self.do_match(idx + 1, pos + len)
                } else {
                    None
                }
            }
            Item::Frontier(set) => {
                let prev = if pos == 0 { 0 } else { self.text[pos - 1] };
                let here = if pos < self.text.len() {
                    self.text[pos]
                } else {
                    0
                };
                if !set.matches(prev) && set.matches(here) {
                    self.do_match(idx + 1, pos)
                } else {
                    None
                }
            }
            Item::EndAnchor => {
                if pos == self.text.len() {
                    self.do_match(idx + 1, pos)
                } else {
                    None
                }
            }
        }
    }

    /// Greedy: consume the longest run, backtrack one at a time.
    fn max_expand(&mut self, idx: usize, pos: usize) -> Option<usize> {
        let mut count = 0;
        while self.single_ok(idx, pos + count) {
            count += 1;
        }
        loop {
            if let Some(end) = self.do_match(idx + 1, pos + count) {
                return Some(end);
            }
            if count == 0 {
                return None;
            }
            count -= 1;
        }
    }

    /// Lazy: try the shortest run first, extend on failure.
    fn min_expand(&mut self, idx: usize, mut pos: usize) -> Option<usize> {
        loop {
            if let Some(end) = self.do_match(idx + 1, pos) {
                return Some(end);
            }
            if self.single_ok(idx, pos) {
                pos += 1;
            } else {
                return None;
            }
        }
    }

    fn closed_capture_span(&self, n: usize) -> Option<(usize, usize)> {
        let cap = self.captures.get(n - 1)?;
        Some((cap.start, cap.end?))
    }
}

/// Find the first match at or after `init` (byte offset).
pub fn find_match(pattern: &LuaPattern, text: &[u8], init: usize) -> Option<MatchResult> {
    let mut start = init.min(text.len());
    loop {
        let mut state = MatchState {
            items: &pattern.items,
            text,
            captures: Vec::new(),
        };
        if let Some(end) = state.do_match(0, start) {
            let captures = state
                .captures
                .into_iter()
                .map(|c| Capture {
                    start: c.start,
                    end: c.end.unwrap_or(c.start),
                    position: c.position,
                })
                .collect();
            return Some(MatchResult {
                start,
                end,
                captures,
            });
        }
        if pattern.anchored || start >= text.len() {
            return None;
        }
        start += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_pattern::parse;

    fn find(pat: &str, text: &str) -> Option<(usize, usize)> {
        let p = parse(pat.as_bytes()).unwrap();
        find_match(&p, text.as_bytes(), 0).map(|m| (m.start, m.end))
    }

    #[test]
    fn test_literal() {
        assert_eq!(find("boom", "kaboom!"), Some((2, 6)));
        assert_eq!(find("zap", "kaboom!"), None);
    }

    #[test]
    fn test_classes_and_quantifiers() {
        assert_eq!(find("%d+", "abc123def"), Some((3, 6)));
        assert_eq!(find("%a*", "   xyz"), Some((0, 0)));
        assert_eq!(find("x%d?y", "xy"), Some((0, 2)));
        assert_eq!(find("x%d?y", "x5y"), Some((0, 3)));
    }

    #[test]
    fn test_greedy_backtracking() {
        // Greedy .* must give back characters for the trailing literal
        assert_eq!(find("%d+0", "12030"), Some((0, 5)));
        assert_eq!(find(".*b", "aaabab"), Some((0, 6)));
    }

    #[test]
    fn test_lazy() {
        assert_eq!(find("a.-b", "axxbyyb"), Some((0, 4)));
    }

    #[test]
    fn test_anchors() {
        assert_eq!(find("^ab", "abab"), Some((0, 2)));
        assert_eq!(find("^b", "ab"), None);
        assert_eq!(find("ab$", "abab"), Some((2, 4)));
    }

    #[test]
    fn test_sets() {
        assert_eq!(find("[abc]+", "xxabccba!"), Some((2, 8)));
        assert_eq!(find("[^%s]+", "  hello  "), Some((2, 7)));
        assert_eq!(find("[a-f]+", "zzdeadbeefzz"), Some((2, 10)));
    }

    #[test]
    fn test_captures() {
        let p = parse(b"(%a+)=(%d+)").unwrap();
        let m = find_match(&p, b"  key=42;", 0).unwrap();
        assert_eq!(m.captures.len(), 2);
        assert_eq!((m.captures[0].start, m.captures[0].end), (2, 5));
        assert_eq!((m.captures[1].start, m.captures[1].end), (6, 8));
    }

    #[test]
    fn test_balanced() {
        assert_eq!(find("%b()", "f(a(b)c)d"), Some((1, 8)));
    }

    #[test]
    fn test_backref() {
        assert_eq!(find("(%a)%1", "abba"), Some((1, 3)));
    }
}
