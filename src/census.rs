//! Provider/consumer reference census
//!
//! Read-only report over every bonded stash and every pool member: how many
//! accounts carry each provider and consumer reference count, split by kind
//! of staker. Useful before a migration to spot accounts whose references
//! would block it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::{info, warn};

use crate::chain::{ChainClient, Collection};
use crate::error::Result;
use crate::migration::ProgressReporter;

/// Reference count → number of accounts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefHistogram(BTreeMap<u32, u64>);

impl RefHistogram {
    pub fn add(&mut self, refs: u32) {
        *self.0.entry(refs).or_insert(0) += 1;
    }

    pub fn count(&self, refs: u32) -> u64 {
        self.0.get(&refs).copied().unwrap_or(0)
    }

    pub fn accounts(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &u64)> {
        self.0.iter()
    }
}

/// Census over stakers and pool members
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefCensus {
    pub solo_providers: RefHistogram,
    pub solo_consumers: RefHistogram,
    pub virtual_providers: RefHistogram,
    pub virtual_consumers: RefHistogram,
    pub member_providers: RefHistogram,
    pub member_consumers: RefHistogram,
    /// Stashes whose controller is a different account
    pub controller_mismatches: u64,
}

impl RefCensus {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let sections = [
            ("Solo staker providers", &self.solo_providers),
            ("Solo staker consumers", &self.solo_consumers),
            ("Virtual staker providers", &self.virtual_providers),
            ("Virtual staker consumers", &self.virtual_consumers),
            ("Pool member providers", &self.member_providers),
            ("Pool member consumers", &self.member_consumers),
        ];

        for (title, histogram) in sections {
            let _ = writeln!(out, "{} ({} accounts):", title, histogram.accounts());
            for (refs, accounts) in histogram.iter() {
                let _ = writeln!(out, "  {:>3} refs: {}", refs, accounts);
            }
        }
        let _ = writeln!(
            out,
            "Stashes with a separate controller: {}",
            self.controller_mismatches
        );
        out
    }
}

/// Walk all stakers then all pool members
pub async fn run_census<C: ChainClient + ?Sized>(chain: &C, step: u64) -> Result<RefCensus> {
    let mut census = RefCensus::default();

    let stashes = chain.keys(Collection::StakingBonded).await?;
    info!("Counting references of {} stakers", stashes.len());
    let progress = ProgressReporter::new(step).with_eta();
    let total = stashes.len() as u64;

    for (index, key) in stashes.iter().enumerate() {
        let stash = key.account()?;
        let info = chain.account(&stash).await?;

        if chain.is_virtual_staker(&stash).await? {
            census.virtual_providers.add(info.providers);
            census.virtual_consumers.add(info.consumers);
        } else {
            census.solo_providers.add(info.providers);
            census.solo_consumers.add(info.consumers);
        }

        if let Some(controller) = chain.bonded_controller(&stash).await? {
            if controller != stash {
                warn!("Stash {} has controller {}", stash, controller);
                census.controller_mismatches += 1;
            }
        }

        progress.report(index as u64 + 1, total, "stakers", false);
    }
    progress.finish();

    let members = chain.keys(Collection::PoolMembers).await?;
    info!("Counting references of {} pool members", members.len());
    let progress = ProgressReporter::new(step).with_eta();
    let total = members.len() as u64;

    for (index, key) in members.iter().enumerate() {
        let info = chain.account(&key.account()?).await?;
        census.member_providers.add(info.providers);
        census.member_consumers.add(info.consumers);
        progress.report(index as u64 + 1, total, "members", false);
    }
    progress.finish();

    Ok(census)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Key;
    use crate::testing::MockChain;
    use subxt::utils::AccountId32;

    #[test]
    fn test_histogram() {
        let mut histogram = RefHistogram::default();
        histogram.add(1);
        histogram.add(1);
        histogram.add(3);
        assert_eq!(histogram.count(1), 2);
        assert_eq!(histogram.count(2), 0);
        assert_eq!(histogram.accounts(), 3);
    }

    #[tokio::test]
    async fn test_census_splits_staker_kinds() {
        let solo = AccountId32([1u8; 32]);
        let controlled = AccountId32([2u8; 32]);
        let controller = AccountId32([3u8; 32]);
        let virtual_staker = AccountId32([4u8; 32]);
        let member = AccountId32([5u8; 32]);

        let mut chain = MockChain::new()
            .with_keys(
                Collection::StakingBonded,
                vec![
                    Key::from_account(&solo),
                    Key::from_account(&controlled),
                    Key::from_account(&virtual_staker),
                ],
            )
            .with_keys(Collection::PoolMembers, vec![Key::from_account(&member)]);
        chain.bonded.insert(solo.clone(), solo.clone());
        chain.bonded.insert(controlled.clone(), controller);
        chain
            .bonded
            .insert(virtual_staker.clone(), virtual_staker.clone());
        chain.virtual_stakers.insert(virtual_staker.clone());
        chain.refs.insert(solo.clone(), (1, 2));
        chain.refs.insert(controlled.clone(), (1, 2));
        chain.refs.insert(virtual_staker.clone(), (2, 0));
        chain.refs.insert(member.clone(), (3, 1));

        let census = run_census(&chain, 0).await.unwrap();

        assert_eq!(census.solo_providers.count(1), 2);
        assert_eq!(census.solo_consumers.count(2), 2);
        assert_eq!(census.virtual_providers.count(2), 1);
        assert_eq!(census.virtual_consumers.count(0), 1);
        assert_eq!(census.member_providers.count(3), 1);
        assert_eq!(census.member_consumers.count(1), 1);
        assert_eq!(census.controller_mismatches, 1);

        let rendered = census.render();
        assert!(rendered.contains("Solo staker providers (2 accounts):"));
        assert!(rendered.contains("Stashes with a separate controller: 1"));
    }
}
