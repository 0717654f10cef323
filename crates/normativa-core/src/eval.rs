//! Offline evaluation against a gold set of questions with expected answers.
//!
//! An answer counts as correct when it covers enough of the expected answer's keywords.
//! This is a cheap proxy, not a semantic judgment.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assistant::{AskError, Assistant};
use crate::prompt::is_abstention;

/// Fraction of expected keywords an answer must contain.
pub const KEYWORD_THRESHOLD: f32 = 0.6;
const MIN_KEYWORD_LEN: usize = 3;

const STOPWORDS: &[&str] = &[
    "de", "del", "la", "el", "lo", "los", "las", "y", "o", "u", "en", "para", "por", "segun",
    "según", "un", "una", "al", "con", "que", "se", "es",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GoldItem {
    pub question: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalRow {
    pub provider: String,
    pub question: String,
    pub expected: String,
    pub answer: String,
    pub references: String,
    pub latency_sec: f64,
    pub abstained: bool,
    pub correct_kw: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub provider: String,
    pub total_questions: usize,
    pub correct_kw_count: usize,
    pub correct_kw_rate: f64,
    pub abstained_count: usize,
    pub abstained_rate: f64,
    pub avg_latency_sec: f64,
}

/// Lowercased alphanumeric words of at least three characters.
fn keywords(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

/// Whether `answer` contains at least [KEYWORD_THRESHOLD] of the expected keywords
/// (stopwords excluded). False when `expected` has no keywords.
pub fn score_keywords(expected: &str, answer: &str) -> bool {
    let expected: HashSet<String> = keywords(expected)
        .into_iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect();
    if expected.is_empty() {
        return false;
    }
    let answer = keywords(answer);
    let hit = expected.iter().filter(|w| answer.contains(*w)).count();
    hit as f32 / expected.len() as f32 >= KEYWORD_THRESHOLD
}

/// Ask every gold question through `assistant`.
pub fn evaluate(provider: &str, assistant: &Assistant, gold: &[GoldItem]) -> Result<Vec<EvalRow>, AskError> {
    let mut rows = Vec::with_capacity(gold.len());
    for item in gold {
        let started = Instant::now();
        let answer = assistant.ask(&item.question)?;
        let latency = started.elapsed().as_secs_f64();
        let row = EvalRow {
            provider: provider.to_string(),
            question: item.question.clone(),
            expected: item.expected.clone(),
            abstained: is_abstention(&answer.answer),
            correct_kw: score_keywords(&item.expected, &answer.answer),
            references: answer.references.join(", "),
            answer: answer.answer,
            latency_sec: round2(latency),
        };
        info!(
            provider,
            question = %row.question,
            correct_kw = row.correct_kw,
            abstained = row.abstained,
            latency_sec = row.latency_sec,
            "evaluated question"
        );
        rows.push(row);
    }
    Ok(rows)
}

/// Totals per provider, in provider name order.
pub fn summarize(rows: &[EvalRow]) -> Vec<ProviderSummary> {
    let mut by_provider: BTreeMap<&str, Vec<&EvalRow>> = BTreeMap::new();
    for row in rows {
        by_provider.entry(row.provider.as_str()).or_default().push(row);
    }
    by_provider
        .into_iter()
        .map(|(provider, list)| {
            let n = list.len();
            let correct = list.iter().filter(|r| r.correct_kw).count();
            let abstained = list.iter().filter(|r| r.abstained).count();
            let latency: f64 = list.iter().map(|r| r.latency_sec).sum();
            ProviderSummary {
                provider: provider.to_string(),
                total_questions: n,
                correct_kw_count: correct,
                correct_kw_rate: percent(correct, n),
                abstained_count: abstained,
                abstained_rate: percent(abstained, n),
                avg_latency_sec: if n == 0 { 0.0 } else { round2(latency / n as f64) },
            }
        })
        .collect()
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (1000.0 * part as f64 / total as f64).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Load a gold set: a JSON array of `{question, expected}`.
pub fn load_gold(path: &Path) -> Result<Vec<GoldItem>, EvalError> {
    let file = File::open(path).map_err(|e| EvalError::Io(path.to_path_buf(), e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| EvalError::Json(path.to_path_buf(), e))
}

/// Write `items` as JSON Lines.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<(), EvalError> {
    let io_err = |e| EvalError::Io(path.to_path_buf(), e);
    let mut w = BufWriter::new(File::create(path).map_err(io_err)?);
    for item in items {
        serde_json::to_writer(&mut w, item).map_err(|e| EvalError::Json(path.to_path_buf(), e))?;
        w.write_all(b"\n").map_err(io_err)?;
    }
    w.flush().map_err(io_err)
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("{}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("{}: {}", .0.display(), .1)]
    Json(PathBuf, serde_json::Error),
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn row(provider: &str, correct: bool, abstained: bool, latency: f64) -> EvalRow {
        EvalRow {
            provider: provider.into(),
            question: "q".into(),
            expected: "e".into(),
            answer: "a".into(),
            references: String::new(),
            latency_sec: latency,
            abstained,
            correct_kw: correct,
        }
    }

    #[test]
    fn keyword_coverage_ignores_stopwords_and_case() {
        assert!(score_keywords(
            "El lunes 4 de agosto de 2025",
            "El plazo vence el LUNES 4 de Agosto de 2025."
        ));
        assert!(!score_keywords("Lunes 4 de agosto de 2025", "Depende de la facultad."));
    }

    #[test]
    fn no_expected_keywords_is_never_correct() {
        assert!(!score_keywords("de la", "de la"));
        assert!(!score_keywords("", "cualquier cosa"));
    }

    #[test]
    fn threshold_is_inclusive() {
        // five keywords, three covered
        assert!(score_keywords("alfa beta gamma delta epsilon", "alfa beta gamma"));
        assert!(!score_keywords("alfa beta gamma delta epsilon", "alfa beta"));
    }

    #[test]
    fn summary_groups_by_provider() {
        let rows = vec![
            row("deepseek", true, false, 1.0),
            row("chatgpt", true, false, 1.0),
            row("chatgpt", false, true, 2.0),
            row("chatgpt", false, false, 3.0),
        ];
        let summary = summarize(&rows);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].provider, "chatgpt");
        assert_eq!(summary[0].total_questions, 3);
        assert_eq!(summary[0].correct_kw_count, 1);
        assert_eq!(summary[0].correct_kw_rate, 33.3);
        assert_eq!(summary[0].abstained_rate, 33.3);
        assert_eq!(summary[0].avg_latency_sec, 2.0);
        assert_eq!(summary[1].correct_kw_rate, 100.0);
    }

    #[test]
    fn gold_and_results_files() {
        let dir = TempDir::new().unwrap();
        let gold_path = dir.path().join("gold_set.json");
        std::fs::write(
            &gold_path,
            r#"[{"question":"¿Plazo de matrícula?","expected":"Lunes 4 de agosto"}]"#,
        )
        .unwrap();
        let gold = load_gold(&gold_path).unwrap();
        assert_eq!(gold[0].expected, "Lunes 4 de agosto");

        let out = dir.path().join("results.jsonl");
        write_jsonl(&out, &[row("chatgpt", true, false, 0.5)]).unwrap();
        let line = std::fs::read_to_string(&out).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["provider"], "chatgpt");
        assert_eq!(value["correct_kw"], true);
    }
}
