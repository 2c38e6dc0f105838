use crate::traits::QuestionPolicy;
use regex::Regex;

pub const LEGAL_KEYWORDS: [&str; 15] = [
    "law",
    "legal",
    "judgement",
    "ipc",
    "case",
    "act",
    "rights",
    "penalty",
    "section",
    "contract",
    "article",
    "bail",
    "petition",
    "tribunal",
    "court",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl QuestionPolicy for AllowAll {
    fn permits(&self, _question: &str, _has_context: bool) -> bool {
        true
    }
}

/// Admits a question when documents matched it, or when it mentions one of the
/// configured keywords as a whole word.
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
    pattern: Regex,
}

impl KeywordPolicy {
    pub fn new<I, S>(keywords: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives = keywords
            .into_iter()
            .map(|keyword| regex::escape(keyword.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))?;
        Ok(Self { pattern })
    }

    pub fn legal() -> Result<Self, regex::Error> {
        Self::new(LEGAL_KEYWORDS)
    }
}

impl QuestionPolicy for KeywordPolicy {
    fn permits(&self, question: &str, has_context: bool) -> bool {
        has_context || self.pattern.is_match(question)
    }
}
