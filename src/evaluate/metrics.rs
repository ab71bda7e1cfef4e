//! 混同行列と要約指標
//!
//! 行が予測ラベル、列が正解ラベル。ラベル順は両者の和集合の辞書順です。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ClassifierError, Result};

/// 正解ラベルで (正解, 予測) の組を安定ソートする
///
/// 同じ正解ラベル内では元の順序を保ち、各組の対応は崩れない。
pub fn sort_by_truth(truth: &[String], predicted: &[String]) -> Result<(Vec<String>, Vec<String>)> {
    check_lengths(truth, predicted)?;
    let mut pairs: Vec<(&String, &String)> = truth.iter().zip(predicted).collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    Ok(pairs
        .into_iter()
        .map(|(t, p)| (t.clone(), p.clone()))
        .unzip())
}

fn check_lengths(truth: &[String], predicted: &[String]) -> Result<()> {
    if truth.len() != predicted.len() {
        return Err(ClassifierError::config(format!(
            "{} ground-truth labels but {} predictions",
            truth.len(),
            predicted.len()
        )));
    }
    Ok(())
}

/// 混同行列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    /// counts[predicted][actual]
    pub counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    pub fn from_labels(truth: &[String], predicted: &[String]) -> Result<Self> {
        check_lengths(truth, predicted)?;
        let labels: Vec<String> = truth
            .iter()
            .chain(predicted)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let index = |label: &String| labels.binary_search(label).unwrap_or_default();
        let mut counts = vec![vec![0u64; labels.len()]; labels.len()];
        for (t, p) in truth.iter().zip(predicted) {
            counts[index(p)][index(t)] += 1;
        }

        Ok(Self { labels, counts })
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// 予測 `predicted`, 正解 `actual` のセル
    pub fn cell(&self, predicted: &str, actual: &str) -> Option<u64> {
        let p = self.labels.iter().position(|l| l == predicted)?;
        let a = self.labels.iter().position(|l| l == actual)?;
        Some(self.counts[p][a])
    }

    pub fn correct(&self) -> u64 {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.correct() as f64 / n as f64,
        }
    }

    /// Cohen's kappa
    ///
    /// 期待一致率が1（全員が同じ1クラス）のときは、完全一致なら1、それ以外は0とする。
    pub fn cohen_kappa(&self) -> f64 {
        let n = self.total() as f64;
        if n == 0.0 {
            return 0.0;
        }
        let observed = self.accuracy();
        let expected: f64 = (0..self.labels.len())
            .map(|i| {
                let predicted: u64 = self.counts[i].iter().sum();
                let actual: u64 = self.counts.iter().map(|row| row[i]).sum();
                (predicted as f64 / n) * (actual as f64 / n)
            })
            .sum();

        if (1.0 - expected).abs() < f64::EPSILON {
            return if (observed - 1.0).abs() < f64::EPSILON { 1.0 } else { 0.0 };
        }
        (observed - expected) / (1.0 - expected)
    }

    /// 全セル中の最大件数
    pub fn max_count(&self) -> u64 {
        self.counts.iter().flatten().copied().max().unwrap_or(0)
    }
}

/// 正解率
pub fn accuracy(truth: &[String], predicted: &[String]) -> Result<f64> {
    Ok(ConfusionMatrix::from_labels(truth, predicted)?.accuracy())
}

/// Cohen's kappa
pub fn cohen_kappa(truth: &[String], predicted: &[String]) -> Result<f64> {
    Ok(ConfusionMatrix::from_labels(truth, predicted)?.cohen_kappa())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_apple_banana_scenario() {
        let truth = strings(&["apple", "banana"]);
        let pred = strings(&["apple", "apple"]);
        let cm = ConfusionMatrix::from_labels(&truth, &pred).unwrap();

        assert_eq!(cm.labels, strings(&["apple", "banana"]));
        assert_eq!(cm.cell("apple", "apple"), Some(1));
        assert_eq!(cm.cell("banana", "banana"), Some(0));
        assert_eq!(cm.cell("apple", "banana"), Some(1));
        assert_eq!(cm.counts, vec![vec![1, 1], vec![0, 0]]);
        assert_eq!(cm.accuracy(), 0.5);
        assert_eq!(cm.cohen_kappa(), 0.0);
    }

    #[test]
    fn test_sort_preserves_pairs() {
        let truth = strings(&["orange", "apple", "banana", "apple", "orange"]);
        let pred = strings(&["o1", "a1", "b1", "a2", "o2"]);
        let (t, p) = sort_by_truth(&truth, &pred).unwrap();
        assert_eq!(t, strings(&["apple", "apple", "banana", "orange", "orange"]));
        assert_eq!(p, strings(&["a1", "a2", "b1", "o1", "o2"]));
        for (ti, pi) in t.iter().zip(&p) {
            let original = truth.iter().zip(&pred).find(|(_, op)| *op == pi).unwrap();
            assert_eq!(original.0, ti);
        }
    }

    #[test]
    fn test_kappa_perfect_and_chance() {
        let truth = strings(&["a", "a", "b", "b"]);
        assert!((cohen_kappa(&truth, &truth).unwrap() - 1.0).abs() < 1e-12);

        // 全て同じクラスで完全一致
        let same = strings(&["a", "a"]);
        assert_eq!(cohen_kappa(&same, &same).unwrap(), 1.0);

        let pred = strings(&["a", "b", "a", "b"]);
        assert!(cohen_kappa(&truth, &pred).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(accuracy(&strings(&["a"]), &strings(&["a", "b"])).is_err());
    }
}
