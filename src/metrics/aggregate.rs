use crate::metrics::record::MetricSample;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Identity of a time series: samples sharing a key are folded into one series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub account_id: String,
    pub metric_name: String,
    pub dimensions: BTreeMap<String, String>,
}

impl AggregationKey {
    pub fn of(sample: &MetricSample) -> Self {
        AggregationKey {
            account_id: sample.account_id.clone(),
            metric_name: sample.metric_name.clone(),
            dimensions: sample.dimensions.clone(),
        }
    }
}

#[derive(Debug)]
struct Group {
    key: AggregationKey,
    samples: Vec<MetricSample>,
}

/// Accumulates samples for one flush and groups them by [`AggregationKey`].
///
/// Groups come out of [`SeriesAggregator::drain`] ordered hierarchically by first
/// appearance: account, then metric name within the account, then dimension set
/// within the metric. Samples inside a group keep their arrival order.
#[derive(Debug)]
pub struct SeriesAggregator {
    threshold: usize,
    len: usize,
    groups: Vec<Group>,
    index: HashMap<AggregationKey, usize>,
    account_rank: HashMap<String, usize>,
    name_rank: HashMap<(String, String), usize>,
}

impl SeriesAggregator {
    pub fn new(threshold: usize) -> Self {
        SeriesAggregator {
            threshold: threshold.max(1),
            len: 0,
            groups: Vec::new(),
            index: HashMap::new(),
            account_rank: HashMap::new(),
            name_rank: HashMap::new(),
        }
    }

    pub fn add(&mut self, sample: MetricSample) {
        let key = AggregationKey::of(&sample);

        let accounts = self.account_rank.len();
        self.account_rank
            .entry(key.account_id.clone())
            .or_insert(accounts);
        let names = self.name_rank.len();
        self.name_rank
            .entry((key.account_id.clone(), key.metric_name.clone()))
            .or_insert(names);

        match self.index.get(&key) {
            Some(&idx) => self.groups[idx].samples.push(sample),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push(Group {
                    key,
                    samples: vec![sample],
                });
            }
        }
        self.len += 1;
    }

    /// True once the accumulated sample count reaches the flush threshold.
    pub fn flush_ready(&self) -> bool {
        self.len >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hands out every group accumulated so far and resets the aggregator.
    pub fn drain(&mut self) -> Vec<(AggregationKey, Vec<MetricSample>)> {
        let mut groups = std::mem::take(&mut self.groups);
        let account_rank = std::mem::take(&mut self.account_rank);
        let name_rank = std::mem::take(&mut self.name_rank);
        self.index.clear();
        self.len = 0;

        // stable, so dimension sets keep their first-seen order
        groups.sort_by_key(|group| {
            (
                account_rank.get(&group.key.account_id).copied(),
                name_rank
                    .get(&(group.key.account_id.clone(), group.key.metric_name.clone()))
                    .copied(),
            )
        });

        debug!(groups = groups.len(), "drained series aggregator");
        groups
            .into_iter()
            .map(|group| (group.key, group.samples))
            .collect()
    }
}
