//! Render a merged sample stream in the Prometheus text format.
//!
//! Samples are loaded into a throwaway `prometheus::Registry` (one vector
//! per metric family) and gathered through the `TextEncoder`, so the output
//! is sorted and escaped exactly like any other `prometheus` exposition.

use crate::collectors::sink::{MetricKind, Sample};
use anyhow::Result;
use prometheus::{
    CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder, proto::MetricFamily,
};
use std::collections::{HashMap, HashSet};
use tracing::warn;

enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

struct Entry {
    label_names: Vec<String>,
    family: Family,
    seen: HashSet<Vec<String>>,
}

/// Encode `samples` as Prometheus text.
///
/// Malformed samples (label count mismatch, a family seen with two label
/// sets, negative counters) are skipped with a warning instead of failing
/// the whole scrape. So is any repeat of a label set already written for its
/// family; the first value wins.
///
/// # Errors
///
/// Returns an error if text encoding fails.
pub fn encode(samples: &[Sample]) -> Result<String> {
    encode_with(samples, Vec::new())
}

/// Like [`encode`], with already gathered families (e.g. from a long-lived
/// registry) merged into the same output. A family whose name is already
/// produced by `samples` is dropped.
///
/// # Errors
///
/// Returns an error if text encoding fails.
pub fn encode_with(samples: &[Sample], extra: Vec<MetricFamily>) -> Result<String> {
    let registry = Registry::new();
    let mut families: HashMap<&str, Entry> = HashMap::new();
    let mut skipped = 0_usize;

    for sample in samples {
        let desc = sample.desc();

        let label_names: Vec<String> = desc
            .variable_labels()
            .iter()
            .cloned()
            .chain(sample.extra_labels().iter().map(|(name, _)| name.clone()))
            .collect();

        if sample.label_values().len() != desc.variable_labels().len() {
            warn!(metric = desc.fq_name(), "label value count mismatch; dropping sample");
            skipped += 1;
            continue;
        }

        if !families.contains_key(desc.fq_name()) {
            let Some(entry) = new_family(&registry, sample, &label_names) else {
                skipped += 1;
                continue;
            };
            families.insert(desc.fq_name(), entry);
        }

        let Some(entry) = families.get_mut(desc.fq_name()) else {
            continue;
        };

        if entry.label_names != label_names {
            warn!(metric = desc.fq_name(), "inconsistent label names; dropping sample");
            skipped += 1;
            continue;
        }

        let values: Vec<&str> = sample
            .label_values()
            .iter()
            .map(String::as_str)
            .chain(sample.extra_labels().iter().map(|(_, value)| value.as_str()))
            .collect();

        if matches!(entry.family, Family::Counter(_)) && sample.value() < 0.0 {
            warn!(metric = desc.fq_name(), "negative counter value; dropping sample");
            skipped += 1;
            continue;
        }

        if !entry.seen.insert(values.iter().map(ToString::to_string).collect()) {
            warn!(
                metric = desc.fq_name(),
                labels = ?values,
                "duplicate label set; dropping sample"
            );
            skipped += 1;
            continue;
        }

        let recorded = match &entry.family {
            Family::Gauge(vec) => vec
                .get_metric_with_label_values(values.as_slice())
                .map(|gauge| gauge.set(sample.value())),
            Family::Counter(vec) => vec
                .get_metric_with_label_values(values.as_slice())
                .map(|counter| counter.inc_by(sample.value())),
        };

        if let Err(e) = recorded {
            warn!(metric = desc.fq_name(), error = %e, "failed to record sample");
            skipped += 1;
        }
    }

    if skipped > 0 {
        warn!(skipped, "samples dropped during exposition");
    }

    let mut gathered = registry.gather();
    for family in extra {
        if gathered.iter().any(|existing| existing.name() == family.name()) {
            warn!(metric = family.name(), "metric family already exposed; dropping");
            continue;
        }
        gathered.push(family);
    }
    gathered.sort_by(|a, b| a.name().cmp(b.name()));

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&gathered, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

fn new_family(registry: &Registry, sample: &Sample, label_names: &[String]) -> Option<Entry> {
    let desc = sample.desc();
    let opts = Opts::new(desc.fq_name(), desc.help());
    let names: Vec<&str> = label_names.iter().map(String::as_str).collect();

    let created = match desc.kind() {
        MetricKind::Gauge => GaugeVec::new(opts, &names).and_then(|vec| {
            registry.register(Box::new(vec.clone()))?;
            Ok(Family::Gauge(vec))
        }),
        MetricKind::Counter => CounterVec::new(opts, &names).and_then(|vec| {
            registry.register(Box::new(vec.clone()))?;
            Ok(Family::Counter(vec))
        }),
    };

    match created {
        Ok(family) => Some(Entry {
            label_names: label_names.to_vec(),
            family,
            seen: HashSet::new(),
        }),
        Err(e) => {
            warn!(metric = desc.fq_name(), error = %e, "failed to create metric family");
            None
        }
    }
}
