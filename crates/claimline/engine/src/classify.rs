//! Revert reason classification.

/// How a revert reason is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertClass {
    /// Another writer already created the entity; the claim's goal is met.
    AlreadyExists,
    Genuine,
}

/// Matches revert reasons against a configurable "already exists" vocabulary.
///
/// Both sides are reduced to lowercase alphanumerics, so `EdgeAlreadyExists`,
/// `already exists` and `ALREADY_EXISTS` all match the marker `AlreadyExists`.
#[derive(Debug, Clone)]
pub struct RevertClassifier {
    markers: Vec<String>,
}

impl RevertClassifier {
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Self {
        Self {
            markers: markers
                .iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, reason: &str) -> RevertClass {
        let reason = normalize(reason);
        if self.markers.iter().any(|m| reason.contains(m.as_str())) {
            RevertClass::AlreadyExists
        } else {
            RevertClass::Genuine
        }
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_across_spellings() {
        let classifier = RevertClassifier::new(&["AlreadyExists"]);
        for reason in ["EdgeAlreadyExists", "execution reverted: entity already exists", "ALREADY_EXISTS"] {
            assert_eq!(classifier.classify(reason), RevertClass::AlreadyExists, "{reason}");
        }
        assert_eq!(classifier.classify("InsufficientValue"), RevertClass::Genuine);
    }

    #[test]
    fn vocabulary_is_configurable() {
        let classifier = RevertClassifier::new(&["AlreadyExists", "TermExists"]);
        assert_eq!(classifier.classify("MultiVault_TermExists"), RevertClass::AlreadyExists);
        let empty = RevertClassifier::new::<&str>(&[]);
        assert_eq!(empty.classify("NodeAlreadyExists"), RevertClass::Genuine);
    }
}
