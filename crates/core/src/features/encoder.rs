use crate::error::PredictError;
use anyhow::{ensure, Context};
use std::collections::HashMap;
use std::path::Path;

/// Label encoding of symbols, fixed when the model was trained.
///
/// A symbol's code is its position in the shipped class list, so the list is
/// taken as-is and never re-sorted or extended.
#[derive(Debug, Clone)]
pub struct SymbolEncoder {
    classes: Vec<String>,
    codes: HashMap<String, u32>,
}

impl SymbolEncoder {
    pub fn from_classes<I, S>(classes: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        ensure!(!classes.is_empty(), "symbol vocabulary must be non-empty");

        let mut codes = HashMap::with_capacity(classes.len());
        for (idx, class) in classes.iter().enumerate() {
            ensure!(
                !class.trim().is_empty() && class.trim() == class,
                "invalid class name at position {idx}: {class:?}"
            );
            let code = u32::try_from(idx).context("symbol vocabulary too large")?;
            ensure!(
                codes.insert(class.clone(), code).is_none(),
                "duplicate class name in vocabulary: {class}"
            );
        }

        Ok(Self { classes, codes })
    }

    /// Loads a JSON array of class names (the encoder's `classes_`).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read symbol vocabulary {}", path.display()))?;
        let classes: Vec<String> = serde_json::from_str(&text).with_context(|| {
            format!(
                "symbol vocabulary {} must be a JSON array of strings",
                path.display()
            )
        })?;
        let encoder = Self::from_classes(classes)?;
        tracing::info!(path = %path.display(), classes = encoder.len(), "symbol vocabulary loaded");
        Ok(encoder)
    }

    pub fn encode(&self, symbol: &str) -> Result<u32, PredictError> {
        self.codes
            .get(symbol.trim())
            .copied()
            .ok_or_else(|| PredictError::UnknownSymbol {
                symbol: symbol.trim().to_string(),
            })
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.classes.get(code as usize).map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.codes.contains_key(symbol.trim())
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn encoder() -> SymbolEncoder {
        SymbolEncoder::from_classes(["AAL", "AAPL", "MSFT", "PPL"]).unwrap()
    }

    #[test]
    fn codes_follow_vocabulary_positions() {
        let enc = encoder();
        assert_eq!(enc.encode("AAL").unwrap(), 0);
        assert_eq!(enc.encode("PPL").unwrap(), 3);
        assert_eq!(enc.encode(" PPL ").unwrap(), 3);
        assert_eq!(enc.decode(2), Some("MSFT"));
        assert_eq!(enc.decode(4), None);
    }

    #[test]
    fn encoding_is_deterministic_and_injective() {
        let enc = encoder();
        let mut seen = HashSet::new();
        for class in enc.classes() {
            let first = enc.encode(class).unwrap();
            assert_eq!(enc.encode(class).unwrap(), first);
            assert!((first as usize) < enc.len());
            assert!(seen.insert(first));
        }
    }

    #[test]
    fn unknown_symbols_are_rejected_not_assigned() {
        let enc = encoder();
        assert_eq!(
            enc.encode("ZZZ9").unwrap_err(),
            PredictError::UnknownSymbol {
                symbol: "ZZZ9".to_string()
            }
        );
        // label encoders are case sensitive
        assert!(enc.encode("ppl").is_err());
        assert_eq!(enc.len(), 4);
    }

    #[test]
    fn rejects_malformed_vocabularies() {
        assert!(SymbolEncoder::from_classes(Vec::<String>::new()).is_err());
        assert!(SymbolEncoder::from_classes(["A", "A"]).is_err());
        assert!(SymbolEncoder::from_classes(["A", " B"]).is_err());
    }

    #[test]
    fn loads_json_class_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labelencoder_name.json");
        std::fs::write(&path, r#"["AAL", "AAPL", "PPL"]"#).unwrap();

        let enc = SymbolEncoder::load(&path).unwrap();
        assert_eq!(enc.encode("PPL").unwrap(), 2);

        std::fs::write(&path, r#"{"classes": ["AAL"]}"#).unwrap();
        assert!(SymbolEncoder::load(&path).is_err());
    }
}
