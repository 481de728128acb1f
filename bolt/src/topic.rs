use std::fmt::{self, Write};
use std::{ops, str::FromStr};

use bytestring::ByteString;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("invalid topic `{0}`")]
    InvalidTopic(String),
    #[error("invalid element `{element}` in topic `{topic}`")]
    InvalidElement { topic: String, element: String },
}

/// One dot-separated element of a topic.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash)]
pub enum Level {
    Normal(ByteString),
    /// `*`, exactly one element
    SingleWildcard,
    /// `>`, one or more trailing elements
    MultiWildcard,
    /// `+`, zero or more trailing elements
    PrefixWildcard,
}

impl Level {
    #[inline]
    pub fn as_str(&self) -> &str {
        match self {
            Level::Normal(s) => &**s,
            Level::SingleWildcard => "*",
            Level::MultiWildcard => ">",
            Level::PrefixWildcard => "+",
        }
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        !matches!(self, Level::Normal(_))
    }

    fn is_legal(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated topic, either a publish topic (literal elements only) or a
/// subscription pattern.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash)]
pub struct Topic(Vec<Level>);

impl Topic {
    /// Splits on `.`. Empty elements are kept so that validation can reject them.
    #[inline]
    pub fn split(s: &str) -> Vec<&str> {
        s.split('.').collect()
    }

    /// Checks `elements` against the publish rules, or the subscription rules
    /// when `for_subscription` is set. `*` may appear anywhere in a
    /// subscription, `>` and `+` only as its last element.
    pub fn validate(elements: &[&str], for_subscription: bool) -> Result<(), TopicError> {
        if elements.is_empty() {
            return Err(TopicError::InvalidTopic(String::new()));
        }
        let last = elements.len() - 1;
        for (pos, element) in elements.iter().enumerate() {
            let ok = match *element {
                "*" => for_subscription,
                ">" | "+" => for_subscription && pos == last,
                s => Level::is_legal(s),
            };
            if !ok {
                return Err(TopicError::InvalidElement {
                    topic: elements.join("."),
                    element: (*element).to_owned(),
                });
            }
        }
        Ok(())
    }

    pub fn parse_publish(s: &str) -> Result<Topic, TopicError> {
        Self::parse(s, false)
    }

    pub fn parse_subscription(s: &str) -> Result<Topic, TopicError> {
        Self::parse(s, true)
    }

    fn parse(s: &str, for_subscription: bool) -> Result<Topic, TopicError> {
        let elements = Self::split(s);
        Self::validate(&elements, for_subscription)?;
        Ok(Topic(
            elements
                .into_iter()
                .map(|e| match e {
                    "*" => Level::SingleWildcard,
                    ">" => Level::MultiWildcard,
                    "+" => Level::PrefixWildcard,
                    s => Level::Normal(ByteString::from(s)),
                })
                .collect(),
        ))
    }

    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.0
    }

    #[inline]
    pub fn is_pattern(&self) -> bool {
        self.0.iter().any(Level::is_wildcard)
    }

    /// Whether this pattern selects the published `elements`.
    pub fn matches(&self, elements: &[&str]) -> bool {
        for (pos, level) in self.0.iter().enumerate() {
            match level {
                Level::MultiWildcard => return elements.len() > pos,
                Level::PrefixWildcard => return elements.len() == pos,
                Level::SingleWildcard => {
                    if pos >= elements.len() {
                        return false;
                    }
                }
                Level::Normal(s) => {
                    if elements.get(pos).copied() != Some(&**s) {
                        return false;
                    }
                }
            }
        }
        elements.len() == self.0.len()
    }

    #[inline]
    pub fn matches_str(&self, topic: &str) -> bool {
        self.matches(&Self::split(topic))
    }
}

impl ops::Deref for Topic {
    type Target = [Level];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Parses a subscription pattern, the more permissive of the two forms.
impl FromStr for Topic {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, TopicError> {
        Topic::parse_subscription(s)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for level in &self.0 {
            if first {
                first = false;
            } else {
                f.write_char('.')?;
            }

            level.fmt(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_ok(s: &str) -> bool {
        Topic::validate(&Topic::split(s), false).is_ok()
    }

    fn subscribe_ok(s: &str) -> bool {
        Topic::validate(&Topic::split(s), true).is_ok()
    }

    #[test]
    fn test_split() {
        assert_eq!(Topic::split("APP.MSG.HB"), vec!["APP", "MSG", "HB"]);
        assert_eq!(Topic::split("A."), vec!["A", ""]);
    }

    #[test]
    fn test_publish_topics() {
        assert!(publish_ok("A.B"));
        assert!(publish_ok("a-b_c.D9"));
        assert!(!publish_ok("AB."));
        assert!(!publish_ok(".AB"));
        assert!(!publish_ok(""));
        assert!(!publish_ok("A>"));
        assert!(!publish_ok(">A"));
        assert!(!publish_ok("A.B C"));
        assert!(!publish_ok("*.A"));
        assert!(!publish_ok("A.*.B"));
        assert!(!publish_ok("A.>"));
    }

    #[test]
    fn test_subscription_topics() {
        assert!(subscribe_ok("*.A"));
        assert!(subscribe_ok("A.*.B"));
        assert!(subscribe_ok("A.>"));
        assert!(subscribe_ok("A.+"));
        assert!(subscribe_ok(">"));
        assert!(!subscribe_ok("A.**.B"));
        assert!(!subscribe_ok("A.>.B"));
        assert!(!subscribe_ok("A.+.B"));
        assert!(!subscribe_ok("A>"));
        assert!(!subscribe_ok("AB."));
    }

    #[test]
    fn test_error_names_the_element() {
        assert_eq!(
            Topic::parse_subscription("A.>.B"),
            Err(TopicError::InvalidElement { topic: "A.>.B".into(), element: ">".into() })
        );
    }

    #[test]
    fn test_matches() {
        let t: Topic = "A.*.C".parse().unwrap();
        assert!(t.matches_str("A.B.C"));
        assert!(!t.matches_str("A.B.B.C"));
        assert!(!t.matches_str("A.C"));

        let t: Topic = "A.>".parse().unwrap();
        assert!(t.matches_str("A.B"));
        assert!(t.matches_str("A.B.C"));
        assert!(!t.matches_str("A"));

        let t: Topic = "A.+".parse().unwrap();
        assert!(t.matches_str("A"));
        assert!(!t.matches_str("A.B"));

        let t: Topic = ">".parse().unwrap();
        assert!(t.matches_str("X"));
        assert!(t.is_pattern());
    }

    #[test]
    fn test_display() {
        let t = Topic::parse_subscription("A.*.>").unwrap();
        assert_eq!(t.to_string(), "A.*.>");
        assert_eq!(t.levels().len(), 3);
        assert!(!Topic::parse_publish("A.B").unwrap().is_pattern());
    }
}
