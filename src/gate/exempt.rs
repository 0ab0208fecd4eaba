//! Paths that bypass the gate.

/// A single exemption pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    /// Matches the path exactly
    Exact(String),
    /// Matches any path starting with the prefix (pattern ended in `*`)
    Prefix(String),
}

impl PathPattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => PathPattern::Prefix(prefix.to_string()),
            None => PathPattern::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => p == path,
            PathPattern::Prefix(p) => path.starts_with(p.as_str()),
        }
    }
}

/// The set of path patterns exempt from rate limiting.
///
/// `/health` matches only `/health`; `/internal/*` matches everything below
/// `/internal/`.
#[derive(Debug, Clone, Default)]
pub struct PathExemptions {
    patterns: Vec<PathPattern>,
}

impl PathExemptions {
    /// Build exemptions from pattern strings. Blank patterns are ignored.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .map(|p| PathPattern::parse(&p))
            .collect();

        Self { patterns }
    }

    /// Whether `path` bypasses the gate.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }

    /// Whether no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_exempts_nothing() {
        let exemptions = PathExemptions::default();
        assert!(exemptions.is_empty());
        assert!(!exemptions.is_exempt("/health"));
    }

    #[test]
    fn test_exact_match() {
        let exemptions = PathExemptions::new(["/health"]);
        assert!(exemptions.is_exempt("/health"));
        assert!(!exemptions.is_exempt("/healthz"));
        assert!(!exemptions.is_exempt("/health/deep"));
    }

    #[test]
    fn test_prefix_match() {
        let exemptions = PathExemptions::new(["/metrics*", "/internal/*"]);
        assert!(exemptions.is_exempt("/metrics"));
        assert!(exemptions.is_exempt("/metrics/prometheus"));
        assert!(exemptions.is_exempt("/internal/status"));
        assert!(!exemptions.is_exempt("/internal"));
        assert!(!exemptions.is_exempt("/api/metrics"));
    }

    #[test]
    fn test_blank_patterns_ignored() {
        let exemptions = PathExemptions::new(["", "   "]);
        assert!(exemptions.is_empty());
        assert!(!exemptions.is_exempt(""));
    }
}
