//! List-entry syntax.
//!
//! One entry per line in a list file, also accepted verbatim through the
//! API:
//!
//! ```text
//! example.com !mail, !shop
//! ```
//!
//! The domain is a dot-separated label sequence; each `!label` names an
//! immediate subdomain exempted from the match. Whitespace around the
//! separators is insignificant.

use std::fmt;

use crate::error::FilterError;

/// A parsed list entry: a domain plus its exception labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    labels: Vec<String>,
    exceptions: Vec<String>,
}

impl Entry {
    /// Parse a single entry. Labels are case-folded here so the trie and
    /// the file format never see mixed case.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FilterError::bad_entry(input, "empty entry"));
        }

        let mut segments = trimmed.split('!');
        let domain_part = segments.next().unwrap_or_default().trim();
        if domain_part.is_empty() {
            return Err(FilterError::bad_entry(input, "missing domain"));
        }

        let mut labels = Vec::new();
        for label in domain_part.split('.') {
            let label = label.trim();
            if label.is_empty() {
                return Err(FilterError::bad_entry(input, "empty label in domain"));
            }
            labels.push(label.to_lowercase());
        }

        let mut exceptions: Vec<String> = Vec::new();
        for segment in segments {
            let label = segment.trim_matches(|c: char| c == ',' || c.is_whitespace());
            if label.is_empty() {
                continue;
            }
            if label.contains('.') {
                return Err(FilterError::bad_entry(
                    input,
                    "exception must be a single label",
                ));
            }
            if label.contains(char::is_whitespace) {
                return Err(FilterError::bad_entry(
                    input,
                    "exception label contains whitespace",
                ));
            }
            let label = label.to_lowercase();
            if !exceptions.contains(&label) {
                exceptions.push(label);
            }
        }
        exceptions.sort();

        Ok(Entry { labels, exceptions })
    }

    pub fn new(labels: Vec<String>, exceptions: Vec<String>) -> Self {
        Entry { labels, exceptions }
    }

    /// Labels in presentation order (`["mail", "example", "com"]`).
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn exceptions(&self) -> &[String] {
        &self.exceptions
    }

    /// The dotted domain without exceptions.
    pub fn domain(&self) -> String {
        self.labels.join(".")
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.domain())?;
        for (i, exception) in self.exceptions.iter().enumerate() {
            if i == 0 {
                write!(f, " !{exception}")?;
            } else {
                write!(f, ", !{exception}")?;
            }
        }
        Ok(())
    }
}

/// Split a query name into lowercased labels, tolerating a trailing dot.
///
/// Query names never fail to parse; a name with an empty label simply
/// cannot match anything in a trie.
pub fn query_labels(name: &str) -> Vec<String> {
    name.trim()
        .trim_end_matches('.')
        .split('.')
        .map(|l| l.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_domain() {
        let entry = Entry::parse("example.com").unwrap();
        assert_eq!(entry.labels(), ["example", "com"]);
        assert!(entry.exceptions().is_empty());
        assert_eq!(entry.to_string(), "example.com");
    }

    #[test]
    fn parses_exceptions_with_and_without_commas() {
        let entry = Entry::parse("example.com !mail, !shop").unwrap();
        assert_eq!(entry.exceptions(), ["mail", "shop"]);

        let entry = Entry::parse("example.com !mail !shop").unwrap();
        assert_eq!(entry.exceptions(), ["mail", "shop"]);
    }

    #[test]
    fn case_folds_on_parse() {
        let entry = Entry::parse("Example.COM !Mail").unwrap();
        assert_eq!(entry.domain(), "example.com");
        assert_eq!(entry.exceptions(), ["mail"]);
    }

    #[test]
    fn formats_round_trip() {
        for text in ["example.com", "example.com !mail", "a.b.c !x, !y"] {
            let entry = Entry::parse(text).unwrap();
            assert_eq!(Entry::parse(&entry.to_string()).unwrap(), entry);
        }
    }

    #[test]
    fn rejects_empty_and_dotted_shapes() {
        assert!(Entry::parse("").is_err());
        assert!(Entry::parse("   ").is_err());
        assert!(Entry::parse(".example.com").is_err());
        assert!(Entry::parse("example.com.").is_err());
        assert!(Entry::parse("example..com").is_err());
        assert!(Entry::parse("example.com !mail.example").is_err());
    }

    #[test]
    fn duplicate_exceptions_collapse() {
        let entry = Entry::parse("example.com !mail, !mail").unwrap();
        assert_eq!(entry.exceptions(), ["mail"]);
    }

    #[test]
    fn query_labels_tolerate_fqdn_dot() {
        assert_eq!(query_labels("Mail.Example.COM."), ["mail", "example", "com"]);
        assert_eq!(query_labels("example.com"), ["example", "com"]);
    }
}
