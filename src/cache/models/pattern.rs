use regex::Regex;

/// 批量失效使用的键匹配规则
#[derive(Debug, Clone)]
pub enum KeyPattern {
    Prefix(String),
    Substring(String),
    Regex(Regex),
}

impl KeyPattern {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyPattern::Prefix(prefix.into())
    }

    pub fn substring(needle: impl Into<String>) -> Self {
        KeyPattern::Substring(needle.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(KeyPattern::Regex(Regex::new(pattern)?))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Substring(needle) => key.contains(needle.as_str()),
            KeyPattern::Regex(re) => re.is_match(key),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(needle: &str) -> Self {
        KeyPattern::Substring(needle.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_and_prefix_match() {
        assert!(KeyPattern::from("economy").matches("req:public:GET:/api/economy/top"));
        assert!(!KeyPattern::prefix("economy").matches("req:public:GET:/api/economy/top"));
        assert!(KeyPattern::prefix("economy").matches("economy:1"));
    }

    #[test]
    fn regex_match() {
        let pattern = KeyPattern::regex(r"^tickets:\d+$").unwrap();
        assert!(pattern.matches("tickets:12"));
        assert!(!pattern.matches("tickets:open"));
        assert!(KeyPattern::regex("(").is_err());
    }
}
