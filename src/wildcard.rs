use anyhow::Result;
use regex::Regex;

/// A case-insensitive `*`/`?` glob compiled to an anchored regex.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    regex: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let source = pattern.trim().to_lowercase();
        let mut expression = String::with_capacity(source.len() + 8);
        expression.push('^');
        for c in source.chars() {
            match c {
                '*' => expression.push_str(".*"),
                '?' => expression.push('.'),
                other => expression.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expression.push('$');

        Ok(Self {
            regex: Regex::new(&expression)?,
            source,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matches against the lower-cased bare module name.
    pub fn is_match(&self, module_name: &str) -> bool {
        self.regex.is_match(&module_name.to_lowercase())
    }
}

/// Any-of set of [`WildcardPattern`]s. The empty set matches nothing.
#[derive(Debug, Clone, Default)]
pub struct WildcardSet {
    patterns: Vec<WildcardPattern>,
}

impl WildcardSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compiles a semicolon-delimited list such as `"System.*;mscorlib"`.
    pub fn parse(list: Option<&str>) -> Result<Self> {
        match list {
            Some(list) => Self::from_patterns(list.split(';')),
            None => Ok(Self::empty()),
        }
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter(|p| !p.as_ref().trim().is_empty())
            .map(|p| WildcardPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_match(&self, module_name: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let lowered = module_name.to_lowercase();
        self.patterns.iter().any(|p| p.regex.is_match(&lowered))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(WildcardPattern::as_str)
    }
}
