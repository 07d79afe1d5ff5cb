//! Dice report assembly and CSV emission.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::core::errors::SegResult;

/// File name used for reports written next to predictions.
pub const REPORT_FILE_NAME: &str = "dice_scores.csv";

const HEADER: &str = "image,dice,hausdorff95";

/// One scored prediction/label pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub dice: f64,
    pub hausdorff95: Option<f64>,
}

/// Accumulates per-case scores and writes them out as CSV.
///
/// The emitted file carries a header row, one row per case with the dice
/// score to four decimals and the Hausdorff column left blank when the
/// distance was not computed, and a closing `mean_dice` row. The same
/// bytes that land in the file are echoed to stdout.
#[derive(Debug, Default)]
pub struct DiceReport {
    records: Vec<MetricRecord>,
}

impl DiceReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, dice: f64, hausdorff95: Option<f64>) {
        self.records.push(MetricRecord {
            name: name.into(),
            dice,
            hausdorff95,
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn mean_dice(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.records.iter().map(|r| r.dice).sum();
        sum / self.records.len() as f64
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');
        for record in &self.records {
            match record.hausdorff95 {
                Some(h) => out.push_str(&format!(
                    "{},{:.4},{:.4}\n",
                    record.name, record.dice, h
                )),
                None => out.push_str(&format!("{},{:.4},\n", record.name, record.dice)),
            }
        }
        out.push_str(&format!("mean_dice,{:.4},\n", self.mean_dice()));
        out
    }

    /// Writes the report to `path`, creating parent directories, and
    /// echoes the same content to stdout.
    pub fn emit(&self, path: &Path) -> SegResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = self.render();
        fs::write(path, &content)?;
        print!("{content}");
        info!(
            path = %path.display(),
            cases = self.records.len(),
            mean_dice = format!("{:.4}", self.mean_dice()),
            "wrote dice report"
        );
        Ok(())
    }

    /// Removes a leftover report from an earlier run. Returns whether a
    /// file was actually deleted.
    pub fn remove_stale(path: &Path) -> SegResult<bool> {
        if path.exists() {
            fs::remove_file(path)?;
            info!(path = %path.display(), "removed stale dice report");
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_one_row_per_case_plus_the_mean() {
        let mut report = DiceReport::new();
        report.push("a.nii.gz", 0.9, Some(1.5));
        report.push("b.nii.gz", 0.8, None);
        report.push("c.nii.gz", 0.7, Some(2.25));
        report.push("d.nii.gz", 0.6, None);
        let rendered = report.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "image,dice,hausdorff95");
        assert_eq!(lines[1], "a.nii.gz,0.9000,1.5000");
        assert_eq!(lines[2], "b.nii.gz,0.8000,");
        assert_eq!(lines[5], "mean_dice,0.7500,");
    }

    #[test]
    fn mean_of_an_empty_report_is_zero() {
        let report = DiceReport::new();
        assert!(report.is_empty());
        assert_eq!(report.mean_dice(), 0.0);
    }

    #[test]
    fn emit_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/dice_scores.csv");
        let mut report = DiceReport::new();
        report.push("case.nii.gz", 1.0, None);
        report.emit(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, report.render());
    }

    #[test]
    fn remove_stale_deletes_only_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(REPORT_FILE_NAME);
        assert!(!DiceReport::remove_stale(&path).unwrap());
        fs::write(&path, "old").unwrap();
        assert!(DiceReport::remove_stale(&path).unwrap());
        assert!(!path.exists());
    }
}
