//! 学習履歴
//!
//! エポックごとの損失と精度を保持し、CSVとして書き出します。

use serde::{Deserialize, Serialize};
use std::path::Path;

/// 1エポック分の指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    /// 検証データがない場合は None
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn loss(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    pub fn accuracy(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.accuracy).collect()
    }

    pub fn val_loss(&self) -> Vec<f64> {
        self.epochs.iter().filter_map(|e| e.val_loss).collect()
    }

    pub fn val_accuracy(&self) -> Vec<f64> {
        self.epochs.iter().filter_map(|e| e.val_accuracy).collect()
    }

    /// グラフ用の系列（空の系列は除く）
    pub fn series(&self) -> Vec<(&'static str, Vec<f64>)> {
        [
            ("loss", self.loss()),
            ("val_loss", self.val_loss()),
            ("acc", self.accuracy()),
            ("val_acc", self.val_accuracy()),
        ]
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .collect()
    }

    /// CSVに書き出す
    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for epoch in &self.epochs {
            writer.serialize(epoch)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// CSVから読み込む
    pub fn read_csv(path: &Path) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let epochs = reader
            .deserialize()
            .collect::<Result<Vec<EpochMetrics>, _>>()?;
        Ok(Self { epochs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize, val: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            epoch,
            loss: 1.0 / epoch as f64,
            accuracy: 0.5,
            val_loss: val,
            val_accuracy: val,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_csv_round_trip_with_missing_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("figures").join("history.csv");
        let mut history = TrainingHistory::default();
        history.push(metrics(1, Some(0.7)));
        history.push(metrics(2, None));
        history.write_csv(&path).unwrap();

        let back = TrainingHistory::read_csv(&path).unwrap();
        assert_eq!(back, history);
    }

    #[test]
    fn test_series_skips_empty() {
        let mut history = TrainingHistory::default();
        history.push(metrics(1, None));
        let names: Vec<&str> = history.series().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["loss", "acc"]);
    }
}
