/// Comma-separated suite selector as accepted by `--suite`.
///
/// Each pattern is an exact name, a prefix (`users*`) or a suffix (`*-smoke`).
/// An empty filter selects every suite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteFilter {
    patterns: Vec<Pattern>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
}

impl SuiteFilter {
    pub fn parse(input: &str) -> Self {
        let patterns = input
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "*")
            .map(|p| {
                if let Some(prefix) = p.strip_suffix('*') {
                    Pattern::Prefix(prefix.to_owned())
                } else if let Some(suffix) = p.strip_prefix('*') {
                    Pattern::Suffix(suffix.to_owned())
                } else {
                    Pattern::Exact(p.to_owned())
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        self.patterns.iter().any(|p| match p {
            Pattern::Exact(n) => name == n,
            Pattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            Pattern::Suffix(suffix) => name.ends_with(suffix.as_str()),
        })
    }
}
