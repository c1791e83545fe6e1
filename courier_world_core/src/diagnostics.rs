//! Sampled per-episode rewards for external plotting.

use serde::{Deserialize, Serialize};

use crate::EntityId;

/// Total reward of every agent, recorded every `interval` episodes.
///
/// `episodes[i]` is the episode index of sample `i`; `rewards[agent][i]` is that
/// agent's total reward in the sampled episode. Episode indices strictly increase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardHistory {
    interval: usize,
    episodes: Vec<usize>,
    rewards: Vec<Vec<f64>>,
}

impl RewardHistory {
    pub fn new(num_agents: usize, interval: usize) -> Self {
        RewardHistory {
            interval: interval.max(1),
            episodes: Vec::new(),
            rewards: vec![Vec::new(); num_agents],
        }
    }

    pub fn is_sampled(&self, episode: usize) -> bool {
        episode % self.interval == 0
    }

    /// Stores `totals` if `episode` falls on the sampling grid. Returns whether
    /// a sample was taken.
    pub fn record(&mut self, episode: usize, totals: &[f64]) -> bool {
        if !self.is_sampled(episode) || totals.len() != self.rewards.len() {
            return false;
        }
        if self.episodes.last().is_some_and(|&last| last >= episode) {
            return false;
        }
        self.episodes.push(episode);
        for (series, &total) in self.rewards.iter_mut().zip(totals) {
            series.push(total);
        }
        true
    }

    pub fn episodes(&self) -> &[usize] {
        &self.episodes
    }

    pub fn rewards(&self, agent: EntityId) -> &[f64] {
        self.rewards.get(agent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_agents(&self) -> usize {
        self.rewards.len()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Mean reward over agents for the latest sample.
    pub fn latest_mean(&self) -> Option<f64> {
        let latest: Vec<f64> = self
            .rewards
            .iter()
            .filter_map(|series| series.last().copied())
            .collect();
        (!latest.is_empty()).then(|| latest.iter().sum::<f64>() / latest.len() as f64)
    }

    /// Trailing mean over up to `window` previous samples, one value per sample.
    /// Series no longer than `window` are returned unchanged.
    pub fn moving_average(&self, agent: EntityId, window: usize) -> Vec<f64> {
        let series = self.rewards(agent);
        if window == 0 || series.len() <= window {
            return series.to_vec();
        }
        (1..=series.len())
            .map(|end| {
                let start = end.saturating_sub(window);
                let slice = &series[start..end];
                slice.iter().sum::<f64>() / slice.len() as f64
            })
            .collect()
    }
}
