//! Metric model shared by collectors and the orchestrator:
//! - `MetricDesc`: validated, immutable description of one metric family.
//! - `Sample`: one value of a family with its label values.
//! - `MetricSink`: cloneable, concurrency-safe writer all units push into.

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Immutable description of a metric: fully qualified name, help text, type
/// and the names of its variable labels.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricDesc {
    fq_name: String,
    help: String,
    kind: MetricKind,
    variable_labels: Vec<String>,
}

fn metric_name_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("Invalid regex")
    })
}

fn label_name_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("Invalid regex")
    })
}

/// Join namespace, subsystem and name with `_`, skipping empty parts.
#[must_use]
pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

impl MetricDesc {
    /// # Errors
    ///
    /// Returns an error if the metric name or any label name is not a valid
    /// Prometheus identifier, or if a label name is repeated.
    pub fn new(
        fq_name: &str,
        help: &str,
        kind: MetricKind,
        variable_labels: &[&str],
    ) -> Result<Self> {
        if !metric_name_regex().is_match(fq_name) {
            return Err(anyhow!("invalid metric name: {fq_name:?}"));
        }

        for (i, label) in variable_labels.iter().enumerate() {
            if !label_name_regex().is_match(label) || label.starts_with("__") {
                return Err(anyhow!("invalid label name {label:?} for {fq_name}"));
            }
            if variable_labels.iter().skip(i + 1).any(|other| other == label) {
                return Err(anyhow!("duplicate label name {label:?} for {fq_name}"));
            }
        }

        Ok(Self {
            fq_name: fq_name.to_string(),
            help: help.to_string(),
            kind,
            variable_labels: variable_labels.iter().map(ToString::to_string).collect(),
        })
    }

    /// Shorthand for a gauge in the `pg` namespace.
    ///
    /// # Errors
    ///
    /// See [`MetricDesc::new`].
    pub fn gauge(
        subsystem: &str,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<Self>> {
        let fq_name = build_fq_name(super::NAMESPACE, subsystem, name);
        Self::new(&fq_name, help, MetricKind::Gauge, labels).map(Arc::new)
    }

    /// Shorthand for a counter in the `pg` namespace.
    ///
    /// # Errors
    ///
    /// See [`MetricDesc::new`].
    pub fn counter(
        subsystem: &str,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<Self>> {
        let fq_name = build_fq_name(super::NAMESPACE, subsystem, name);
        Self::new(&fq_name, help, MetricKind::Counter, labels).map(Arc::new)
    }

    #[must_use]
    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }

    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.kind
    }

    #[must_use]
    pub fn variable_labels(&self) -> &[String] {
        &self.variable_labels
    }
}

/// One value of a metric family.
#[derive(Clone, Debug)]
pub struct Sample {
    desc: Arc<MetricDesc>,
    label_values: Vec<String>,
    extra_labels: Vec<(String, String)>,
    value: f64,
}

impl Sample {
    #[must_use]
    pub fn new(desc: &Arc<MetricDesc>, value: f64, label_values: &[&str]) -> Self {
        Self {
            desc: Arc::clone(desc),
            label_values: label_values.iter().map(ToString::to_string).collect(),
            extra_labels: Vec::new(),
            value,
        }
    }

    #[must_use]
    pub const fn desc(&self) -> &Arc<MetricDesc> {
        &self.desc
    }

    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Labels added by the sink the sample was written to (e.g. `server`).
    #[must_use]
    pub fn extra_labels(&self) -> &[(String, String)] {
        &self.extra_labels
    }

    /// Look up a label value by name, variable labels first.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.desc
            .variable_labels
            .iter()
            .position(|label| label == name)
            .and_then(|i| self.label_values.get(i))
            .or_else(|| {
                self.extra_labels
                    .iter()
                    .find(|(label, _)| label == name)
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

/// Destination for samples during a collection cycle.
///
/// Cheap to clone; every clone feeds the same receiver so any number of
/// concurrent units can write into one stream.
#[derive(Clone, Debug)]
pub struct MetricSink {
    tx: UnboundedSender<Sample>,
    extra_labels: Arc<[(String, String)]>,
}

/// Reading half of a [`MetricSink`].
#[derive(Debug)]
pub struct SampleReceiver {
    rx: UnboundedReceiver<Sample>,
}

impl MetricSink {
    #[must_use]
    pub fn channel() -> (Self, SampleReceiver) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx,
                extra_labels: Arc::from(Vec::new()),
            },
            SampleReceiver { rx },
        )
    }

    /// Returns a sink writing into the same stream that tags every sample
    /// with `name=value`.
    #[must_use]
    pub fn with_label(&self, name: &str, value: &str) -> Self {
        let mut extra_labels = self.extra_labels.to_vec();
        extra_labels.push((name.to_string(), value.to_string()));
        Self {
            tx: self.tx.clone(),
            extra_labels: Arc::from(extra_labels),
        }
    }

    pub fn send(&self, mut sample: Sample) {
        sample.extra_labels.extend(self.extra_labels.iter().cloned());
        if self.tx.send(sample).is_err() {
            trace!("sample receiver dropped; discarding sample");
        }
    }

    /// Write one sample of `desc` with the given label values.
    pub fn record(&self, desc: &Arc<MetricDesc>, value: f64, label_values: &[&str]) {
        self.send(Sample::new(desc, value, label_values));
    }
}

impl SampleReceiver {
    /// Take every sample currently buffered without waiting.
    pub fn drain(&mut self) -> Vec<Sample> {
        let mut samples = Vec::new();
        while let Ok(sample) = self.rx.try_recv() {
            samples.push(sample);
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fq_name() {
        assert_eq!(
            build_fq_name("pg", "scrape", "collector_success"),
            "pg_scrape_collector_success"
        );
        assert_eq!(build_fq_name("pg", "", "up"), "pg_up");
        assert_eq!(build_fq_name("", "", "up"), "up");
    }

    #[test]
    fn test_desc_rejects_invalid_names() {
        assert!(MetricDesc::new("pg-up", "", MetricKind::Gauge, &[]).is_err());
        assert!(MetricDesc::new("pg_up", "", MetricKind::Gauge, &["bad-label"]).is_err());
        assert!(MetricDesc::new("pg_up", "", MetricKind::Gauge, &["__reserved"]).is_err());
        assert!(MetricDesc::new("pg_up", "", MetricKind::Gauge, &["a", "a"]).is_err());
        assert!(MetricDesc::new("pg_up", "help", MetricKind::Gauge, &["server"]).is_ok());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_sample_label_lookup() {
        let desc = MetricDesc::gauge("database", "size_bytes", "size", &["datname"]).unwrap();
        let (sink, mut rx) = MetricSink::channel();
        sink.with_label("server", "db1:5432/postgres")
            .record(&desc, 42.0, &["app"]);

        let samples = rx.drain();
        assert_eq!(samples.len(), 1);
        let sample = samples.first().unwrap();
        assert_eq!(sample.desc().fq_name(), "pg_database_size_bytes");
        assert_eq!(sample.label("datname"), Some("app"));
        assert_eq!(sample.label("server"), Some("db1:5432/postgres"));
        assert_eq!(sample.label("missing"), None);
        assert!((sample.value() - 42.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_concurrent_writers_share_one_stream() {
        let desc = MetricDesc::gauge("", "up", "up", &["n"]).unwrap();
        let (sink, mut rx) = MetricSink::channel();

        let mut handles = Vec::new();
        for n in 0..8 {
            let sink = sink.clone();
            let desc = Arc::clone(&desc);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    sink.record(&desc, 1.0, &[&n.to_string()]);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(rx.drain().len(), 800);
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (sink, rx) = MetricSink::channel();
        drop(rx);
        if let Ok(desc) = MetricDesc::gauge("", "up", "up", &[]) {
            sink.record(&desc, 1.0, &[]);
        }
    }
}
