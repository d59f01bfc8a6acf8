use crate::engine::Probed;
use crate::probe::ErrorKind;
use crate::query::Query;
use crate::server::ServerRecord;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// What one resolver said
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Answer records, in the order the resolver returned them.
    Success(Vec<String>),
    Failure(ErrorKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The answer records joined one per line. Two resolvers returning the
    /// same records in the same order produce the same string.
    pub fn joined_answer(&self) -> String {
        match self {
            Outcome::Success(answers) => answers.join("\n"),
            Outcome::Failure(_) => String::new(),
        }
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }
}

impl From<Result<Vec<String>, ErrorKind>> for Outcome {
    fn from(result: Result<Vec<String>, ErrorKind>) -> Self {
        match result {
            Ok(answers) => Outcome::Success(answers),
            Err(e) => Outcome::Failure(e),
        }
    }
}

#[derive(Serialize)]
struct Entry {
    #[serde(rename = "Answer")]
    answer: String,
    #[serde(rename = "Error", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Entry {
            answer: self.joined_answer(),
            error: self.error().map(ToString::to_string),
        }
        .serialize(serializer)
    }
}

/// Deduplicated counts over every outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub success_count: usize,
    pub error_count: usize,
    /// Keyed by [`Outcome::joined_answer`].
    pub answer_counts: BTreeMap<String, usize>,
    pub error_counts: BTreeMap<ErrorKind, usize>,
}

/// The result of asking every server in an inventory the same question
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedResult {
    /// One entry per probed server, keyed by its identity.
    pub detailed: BTreeMap<String, Outcome>,
    pub summary: Summary,
}

impl AggregatedResult {
    /// Number of servers that were asked.
    pub fn total(&self) -> usize {
        self.detailed.len()
    }

    /// The detailed view as JSON, keys sorted.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.detailed)
    }

    /// Human readable summary, most common answers first.
    pub fn to_text_summary(&self, query: &Query) -> String {
        let summary = &self.summary;
        let mut text = format!(
            "\n - RESULTS\nI asked {} servers for {} records related to {},\n{} responded with records and {} gave errors\nHere are the results;",
            self.total(),
            query.record_type(),
            query.domain(),
            summary.success_count,
            summary.error_count
        );
        text.push_str("\n\n\n");

        for (answer, count) in by_count(summary.answer_counts.iter().map(|(k, v)| (k.clone(), *v))) {
            text.push_str(&format!("{} servers responded with;\n{}\n\n", count, answer));
        }

        if summary.error_count > 0 {
            text.push_str("\nAnd here are the errors;\n\n");
            for (error, count) in by_count(summary.error_counts.iter().map(|(k, v)| (k.to_string(), *v))) {
                text.push_str(&format!("{} servers responded with;\n{}\n\n", count, error));
            }
        }

        text
    }
}

fn by_count(entries: impl Iterator<Item = (String, usize)>) -> Vec<(String, usize)> {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
}

/// Folds outcomes into an [`AggregatedResult`]
///
/// The aggregator owns the whole result, so the counters and the detailed
/// map always agree with each other. Feed it from a single task, e.g. with
/// [`Aggregator::collect`] draining the engine's result channel.
#[derive(Debug, Default)]
pub struct Aggregator {
    result: AggregatedResult,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, server: &ServerRecord, outcome: Outcome) {
        let summary = &mut self.result.summary;
        match &outcome {
            Outcome::Success(_) => {
                summary.success_count += 1;
                *summary
                    .answer_counts
                    .entry(outcome.joined_answer())
                    .or_insert(0) += 1;
            }
            Outcome::Failure(e) => {
                summary.error_count += 1;
                *summary.error_counts.entry(e.clone()).or_insert(0) += 1;
            }
        }

        let key = self.unique_key(server);
        self.result.detailed.insert(key, outcome);
    }

    /// Identity of the server, qualified with its address when another
    /// server already reported under the same name.
    fn unique_key(&self, server: &ServerRecord) -> String {
        let identity = server.identity();
        if !self.result.detailed.contains_key(identity) {
            return identity.to_string();
        }

        let mut key = format!("{} ({})", identity, server.address());
        let mut n = 2;
        while self.result.detailed.contains_key(&key) {
            key = format!("{} ({} #{})", identity, server.address(), n);
            n += 1;
        }
        key
    }

    pub fn finish(self) -> AggregatedResult {
        self.result
    }

    /// Drain a run's result channel into an aggregate.
    pub async fn collect(mut rx: mpsc::Receiver<Probed<Vec<String>>>) -> AggregatedResult {
        let mut aggregator = Self::new();
        while let Some((server, outcome)) = rx.recv().await {
            aggregator.record(&server, outcome.into());
        }
        aggregator.finish()
    }
}

impl Extend<Probed<Vec<String>>> for Aggregator {
    fn extend<I: IntoIterator<Item = Probed<Vec<String>>>>(&mut self, iter: I) {
        for (server, outcome) in iter {
            self.record(&server, outcome.into());
        }
    }
}

impl FromIterator<Probed<Vec<String>>> for AggregatedResult {
    fn from_iter<I: IntoIterator<Item = Probed<Vec<String>>>>(iter: I) -> Self {
        let mut aggregator = Aggregator::new();
        aggregator.extend(iter);
        aggregator.finish()
    }
}
