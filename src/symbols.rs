// =============================================================================
// Symbol Directory — static code→name mapping for the KOSPI universe
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One row of the symbol master file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub market: String,
}

/// Shape of the symbol master document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFile {
    #[serde(default)]
    pub total_stocks: usize,
    #[serde(default)]
    pub market_filter: String,
    pub stocks: Vec<SymbolEntry>,
}

/// Static code→name directory. The set is fixed for a trading day.
#[derive(Debug, Clone)]
pub struct SymbolDirectory {
    by_code: HashMap<String, SymbolEntry>,
    universe: Vec<String>,
}

impl SymbolDirectory {
    /// Load the symbol master JSON and pre-compute the tradable universe:
    /// numeric 6-digit codes whose names do not carry the preferred-share
    /// marker "우".
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read symbol file {}", path.display()))?;
        let file: SymbolFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse symbol file {}", path.display()))?;
        let dir = Self::from_entries(file.stocks);
        info!(
            path = %path.display(),
            total = dir.by_code.len(),
            universe = dir.universe.len(),
            "symbol directory loaded"
        );
        Ok(dir)
    }

    pub fn from_entries(entries: Vec<SymbolEntry>) -> Self {
        let mut by_code = HashMap::with_capacity(entries.len());
        let mut universe = Vec::new();
        for entry in entries {
            if Self::is_tradable(&entry) {
                universe.push(entry.code.clone());
            }
            by_code.insert(entry.code.clone(), entry);
        }
        Self { by_code, universe }
    }

    fn is_tradable(entry: &SymbolEntry) -> bool {
        entry.code.len() == 6
            && entry.code.chars().all(|c| c.is_ascii_digit())
            && !entry.name.contains('우')
    }

    pub fn name_of(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(|e| e.name.as_str())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    /// Codes passing the universe filter, in file order.
    pub fn universe(&self) -> &[String] {
        &self.universe
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(code: &str, name: &str) -> SymbolEntry {
        SymbolEntry {
            code: code.to_string(),
            name: name.to_string(),
            market: "KOSPI".to_string(),
        }
    }

    #[test]
    fn universe_filters_preferred_shares_and_bad_codes() {
        let dir = SymbolDirectory::from_entries(vec![
            entry("005930", "삼성전자"),
            entry("005935", "삼성전자우"),
            entry("00593A", "전환우선주"),
            entry("035420", "NAVER"),
        ]);
        assert_eq!(dir.universe(), &["005930".to_string(), "035420".to_string()]);
        // Filtered symbols stay resolvable by code.
        assert_eq!(dir.name_of("005935"), Some("삼성전자우"));
        assert_eq!(dir.len(), 4);
    }

    #[test]
    fn json_roundtrip() {
        let json = r#"{
            "total_stocks": 2,
            "market_filter": "KOSPI",
            "stocks": [
                {"code": "005930", "name": "삼성전자", "market": "KOSPI"},
                {"code": "000660", "name": "SK하이닉스", "market": "KOSPI"}
            ]
        }"#;
        let file: SymbolFile = serde_json::from_str(json).unwrap();
        let dir = SymbolDirectory::from_entries(file.stocks);
        assert!(dir.contains("000660"));
        assert_eq!(dir.name_of("005930"), Some("삼성전자"));
        assert_eq!(dir.universe().len(), 2);
    }
}
