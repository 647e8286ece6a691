use serde::Serialize;

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(range: std::ops::Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

/// Maps byte offsets to line/column positions within source text.
pub struct SourceMap {
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        SourceMap { line_starts }
    }

    /// Returns (line, col), both 1-based.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let col = offset.saturating_sub(self.line_starts[line]);
        (line + 1, col + 1)
    }

    /// Text of the 1-based line `line`, without its terminator.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        if line == 0 || line > self.line_starts.len() {
            return "";
        }
        let start = self.line_starts[line - 1];
        let end = self.line_starts.get(line).copied().unwrap_or(source.len());
        source[start..end].trim_end_matches('\n').trim_end_matches('\r')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_across_lines() {
        let src = "int x = 5;\nprocess p\n  guardblock";
        let sm = SourceMap::new(src);
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.lookup(4), (1, 5));
        assert_eq!(sm.lookup(10), (1, 11)); // the newline itself
        assert_eq!(sm.lookup(11), (2, 1));
        assert_eq!(sm.lookup(23), (3, 3));
    }

    #[test]
    fn line_text_lookup() {
        let src = "byte a = 1;\r\nbyte b = 2;\n";
        let sm = SourceMap::new(src);
        assert_eq!(sm.line_text(src, 1), "byte a = 1;");
        assert_eq!(sm.line_text(src, 2), "byte b = 2;");
        assert_eq!(sm.line_text(src, 3), "");
        assert_eq!(sm.line_text(src, 0), "");
        assert_eq!(sm.line_text(src, 42), "");
    }

    #[test]
    fn empty_source() {
        let sm = SourceMap::new("");
        assert_eq!(sm.lookup(0), (1, 1));
        assert_eq!(sm.line_text("", 1), "");
    }
}
