// Lua pattern matching: parser builds a flat item list, matcher runs a
// backtracking walk over it. Quantifiers apply only to single-character
// matchers, which keeps backtracking local to each item.

mod matcher;
mod parser;

pub use matcher::{find_match, Capture, MatchResult};
pub use parser::{parse, Item, LuaPattern, Quant, Set, SingleMatcher};
