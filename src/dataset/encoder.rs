//! ラベルエンコーダ
//!
//! クラス名と整数コードの双方向対応。コードはクラス名の辞書順で `[0, n_classes)` に割り当てます。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{ClassifierError, Result};

/// エンコーダの保存ファイル名
pub const ENCODER_FILE_NAME: &str = "encoder.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// ラベル全体から語彙を構築
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let classes: BTreeSet<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn encode_one(&self, label: &str) -> Result<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .map_err(|_| ClassifierError::UnknownLabel(label.to_string()))
    }

    pub fn encode<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels.iter().map(|l| self.encode_one(l.as_ref())).collect()
    }

    pub fn decode_one(&self, code: usize) -> Result<&str> {
        self.classes.get(code).map(String::as_str).ok_or_else(|| {
            ClassifierError::UnknownLabel(format!(
                "code {} is outside [0, {})",
                code,
                self.classes.len()
            ))
        })
    }

    pub fn decode(&self, codes: &[usize]) -> Result<Vec<String>> {
        codes
            .iter()
            .map(|&c| self.decode_one(c).map(str::to_string))
            .collect()
    }

    /// one-hot表現（必要なときだけ使う）
    pub fn one_hot(&self, codes: &[usize]) -> Result<Vec<Vec<f32>>> {
        codes
            .iter()
            .map(|&c| {
                self.decode_one(c)?;
                let mut row = vec![0.0; self.classes.len()];
                row[c] = 1.0;
                Ok(row)
            })
            .collect()
    }

    /// JSONとして保存
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// JSONから読み込み（ファイルがなければ `MissingArtifact`）
    pub fn load(path: &Path) -> Result<Self> {
        ClassifierError::require_file(path)?;
        let content = fs::read_to_string(path)?;
        let encoder: Self = serde_json::from_str(&content)?;
        if encoder.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ClassifierError::config(format!(
                "encoder classes in {} are not sorted and unique",
                path.display()
            )));
        }
        Ok(encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_assigns_alphabetical_codes() {
        let encoder = LabelEncoder::fit(&["orange", "apple", "banana", "apple"]);
        assert_eq!(encoder.classes(), &["apple", "banana", "orange"]);
        assert_eq!(encoder.encode(&["banana", "orange", "apple"]).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_round_trip() {
        let labels = vec!["b", "a", "c", "a", "b"];
        let encoder = LabelEncoder::fit(&labels);
        let codes = encoder.encode(&labels).unwrap();
        assert_eq!(encoder.decode(&codes).unwrap(), labels);
    }

    #[test]
    fn test_unknown_label_and_code() {
        let encoder = LabelEncoder::fit(&["apple", "banana"]);
        assert!(matches!(encoder.encode(&["kiwi"]), Err(ClassifierError::UnknownLabel(_))));
        assert!(matches!(encoder.decode(&[2]), Err(ClassifierError::UnknownLabel(_))));
    }

    #[test]
    fn test_one_hot() {
        let encoder = LabelEncoder::fit(&["apple", "banana", "orange"]);
        let rows = encoder.one_hot(&[2, 0]).unwrap();
        assert_eq!(rows, vec![vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]]);
        assert!(encoder.one_hot(&[3]).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoders").join("basic").join(ENCODER_FILE_NAME);
        let encoder = LabelEncoder::fit(&["apple", "banana"]);
        encoder.save(&path).unwrap();
        assert_eq!(LabelEncoder::load(&path).unwrap(), encoder);

        assert!(matches!(
            LabelEncoder::load(&dir.path().join("missing.json")),
            Err(ClassifierError::MissingArtifact(_))
        ));
    }
}
