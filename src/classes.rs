use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_CLASS_CONFIG_FILE: &str = "/etc/mail/filter_rspamd_classes.json";

/// Maps candidate recipient addresses and a spam score to a class label.
pub trait Classifier {
    /// Returns the class for `score`, or an empty string when no class applies.
    fn get_class(&self, addresses: &[String], score: f64) -> String;
}

/// One threshold: scores below `score` (and above the previous boundary) get `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamClass {
    pub name: String,
    pub score: f64,
}

impl SpamClass {
    fn new(name: &str, score: f64) -> Self {
        Self {
            name: name.to_string(),
            score,
        }
    }
}

/// Per-recipient class thresholds, read from a JSON file shaped like
///
/// ```json
/// {
///     "username@example.org": [
///         { "name": "ham", "score": 0 },
///         { "name": "possible", "score": 3 },
///         { "name": "probable", "score": 10 },
///         { "name": "spam", "score": 999 }
///     ]
/// }
/// ```
///
/// The last boundary of every list is unbounded; 999 is only a placeholder.
#[derive(Debug, Clone, Serialize)]
pub struct SpamClasses {
    pub classes: HashMap<String, Vec<SpamClass>>,
    pub default_classes: Vec<SpamClass>,
}

impl Default for SpamClasses {
    fn default() -> Self {
        Self {
            classes: HashMap::new(),
            default_classes: default_class_list(),
        }
    }
}

pub fn default_class_list() -> Vec<SpamClass> {
    vec![
        SpamClass::new("ham", 0.0),
        SpamClass::new("possible", 3.0),
        SpamClass::new("probable", 10.0),
        SpamClass::new("spam", 999.0),
    ]
}

impl SpamClasses {
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let classes: HashMap<String, Vec<SpamClass>> =
            serde_json::from_str(content).context("invalid class config JSON")?;
        for (address, list) in &classes {
            validate_class_list(address, list)?;
        }
        Ok(Self {
            classes,
            ..Default::default()
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read class config: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("failed to load class config: {}", path.display()))
    }

    /// Loads `path`, falling back to the built-in thresholds when it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let classes = Self::from_file(path)?;
            log::debug!(
                "read {} class lists from {}",
                classes.classes.len(),
                path.display()
            );
            Ok(classes)
        } else {
            log::warn!(
                "Class config file '{}' not found, using default classes",
                path.display()
            );
            Ok(Self::default())
        }
    }

    fn class_list(&self, addresses: &[String]) -> &[SpamClass] {
        addresses
            .iter()
            .find_map(|address| self.classes.get(address))
            .unwrap_or(&self.default_classes)
    }
}

impl Classifier for SpamClasses {
    fn get_class(&self, addresses: &[String], score: f64) -> String {
        let list = self.class_list(addresses);
        let last = list.len().saturating_sub(1);
        list.iter()
            .enumerate()
            .find(|(i, class)| *i == last || score < class.score)
            .map(|(_, class)| class.name.clone())
            .unwrap_or_default()
    }
}

fn validate_class_list(address: &str, list: &[SpamClass]) -> anyhow::Result<()> {
    let mut previous = f64::NEG_INFINITY;
    for class in list {
        if class.name.is_empty() {
            bail!("{address}: class with empty name");
        }
        if class.score < previous {
            bail!(
                "{address}: class '{}' threshold {} is below the previous threshold {previous}",
                class.name,
                class.score
            );
        }
        previous = class.score;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CLASS_JSON: &str = r#"{
        "username@example.org": [
            { "name": "ham", "score": 0 },
            { "name": "possible", "score": 3 },
            { "name": "probable", "score": 10 },
            { "name": "spam", "score": 999 }
        ],
        "othername@example.org": [
            { "name": "not_spam", "score": 0 },
            { "name": "suspected_spam", "score": 10 },
            { "name": "is_spam", "score": 999 }
        ],
        "nobody@example.org": []
    }"#;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_thresholds() {
        let classes = SpamClasses::default();
        let to = addrs(&["user@example.org"]);
        assert_eq!(classes.get_class(&to, -1.0), "ham");
        assert_eq!(classes.get_class(&to, 0.0), "possible");
        assert_eq!(classes.get_class(&to, 1.155), "possible");
        assert_eq!(classes.get_class(&to, 3.0), "probable");
        assert_eq!(classes.get_class(&to, 10.0), "spam");
        assert_eq!(classes.get_class(&to, 5000.0), "spam");
    }

    #[test]
    fn test_per_address_thresholds() {
        let classes = SpamClasses::from_json(CLASS_JSON).unwrap();
        let other = addrs(&["othername@example.org"]);
        assert_eq!(classes.get_class(&other, 5.0), "suspected_spam");
        assert_eq!(classes.get_class(&other, 20.0), "is_spam");

        // first known candidate wins
        let both = addrs(&["unknown@example.org", "othername@example.org"]);
        assert_eq!(classes.get_class(&both, -5.0), "not_spam");
    }

    #[test]
    fn test_empty_class_list_yields_empty_label() {
        let classes = SpamClasses::from_json(CLASS_JSON).unwrap();
        assert_eq!(classes.get_class(&addrs(&["nobody@example.org"]), 1.0), "");
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let json = r#"{ "a@b.org": [ { "name": "x", "score": 5 }, { "name": "y", "score": 1 } ] }"#;
        assert!(SpamClasses::from_json(json).is_err());
        assert!(SpamClasses::from_json("not json").is_err());
    }

    #[test]
    fn test_load_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLASS_JSON.as_bytes()).unwrap();
        let classes = SpamClasses::load(file.path()).unwrap();
        assert_eq!(classes.classes.len(), 3);

        let dir = tempfile::tempdir().unwrap();
        let missing = SpamClasses::load(dir.path().join("missing.json")).unwrap();
        assert!(missing.classes.is_empty());
        assert_eq!(missing.default_classes, default_class_list());
    }
}
