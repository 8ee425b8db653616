use std::fmt;

/// Result discriminator carried in the backend's `type` field.
///
/// Selects the destination queue of a result (see `messaging::QueueRoutes`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultCategory {
    Pron,
    Inton,
    Llm,
    Error,
    Conversation,
    /// Any category the gateway has no table entry for.
    Other(String),
}

impl ResultCategory {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pron" => Self::Pron,
            "inton" => Self::Inton,
            "llm" => Self::Llm,
            "error" => Self::Error,
            "conversation" => Self::Conversation,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pron => "pron",
            Self::Inton => "inton",
            Self::Llm => "llm",
            Self::Error => "error",
            Self::Conversation => "conversation",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ResultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_known_names() {
        for name in ["pron", "inton", "llm", "error", "conversation"] {
            let category = ResultCategory::parse(name);
            assert!(!matches!(category, ResultCategory::Other(_)));
            assert_eq!(category.as_str(), name);
        }
    }

    #[test]
    fn unknown_names_are_kept() {
        assert_eq!(ResultCategory::parse("fluency"), ResultCategory::Other("fluency".into()));
        assert_eq!(ResultCategory::parse("PRON").to_string(), "PRON");
    }
}
