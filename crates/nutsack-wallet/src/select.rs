//! Proof selection strategies.
//!
//! Selects proofs of one mint to cover a target amount plus fee reserve.
//! Selection never mutates the ledger; the caller removes the spent proofs
//! only after the mint confirms the spend.

use crate::error::WalletError;
use crate::ledger::ProofLedger;
use nutsack_types::{proofs_amount, split_amount, Proof};
use serde::{Deserialize, Serialize};

/// Available proof selection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Smallest single proof that covers the need, else largest-first.
    #[default]
    Default,
    /// Prefer largest proofs first (fewest inputs).
    LargestFirst,
    /// Prefer smallest proofs first (consolidates small denominations).
    SmallestFirst,
    /// Random order.
    Random,
    /// Spend every proof of the mint (sweep).
    All,
}

impl std::str::FromStr for SelectionStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "largest-first" | "largest" => Ok(Self::LargestFirst),
            "smallest-first" | "smallest" => Ok(Self::SmallestFirst),
            "random" => Ok(Self::Random),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "unknown strategy: {} (use default, largest-first, smallest-first, random, or all)",
                s
            )),
        }
    }
}

/// Options for proof selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOptions {
    pub strategy: SelectionStrategy,
    /// Maximum number of proofs to spend.
    pub max_inputs: usize,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Default,
            max_inputs: 64,
        }
    }
}

/// Result of proof selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Proofs to spend.
    pub spend: Vec<Proof>,
    /// Sum of `spend`.
    pub total: u64,
    /// Owed back as change: `total - (target + fee_reserve)`.
    pub change_needed: u64,
}

impl Selection {
    /// Denominations the mint would issue for the change.
    pub fn change_denominations(&self) -> Vec<u64> {
        split_amount(self.change_needed)
    }
}

/// Select spendable proofs of `mint` covering `target + fee_reserve`.
///
/// Fails with `InsufficientFunds` if the mint's spendable balance is short,
/// and with `UnknownMint` if the mint was never registered. Never returns a
/// partial selection.
pub fn select(
    ledger: &ProofLedger,
    mint: &str,
    target: u64,
    fee_reserve: u64,
    options: &SelectionOptions,
) -> Result<Selection, WalletError> {
    let candidates = ledger.proofs_for_mint(mint)?;
    let have = proofs_amount(&candidates);
    let need = target.checked_add(fee_reserve).ok_or(WalletError::InsufficientFunds {
        have,
        need: u64::MAX,
    })?;

    if have < need {
        return Err(WalletError::InsufficientFunds { have, need });
    }

    let mut result = select_proofs(&candidates, need, options.strategy);
    if result.as_ref().map_or(false, |r| r.spend.len() > options.max_inputs) {
        let mut sorted = candidates;
        sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
        sorted.truncate(options.max_inputs);
        let capped = proofs_amount(&sorted);
        if capped < need {
            log::warn!(
                "{}: {} sats needed but the {} largest proofs hold {}",
                mint,
                need,
                options.max_inputs,
                capped
            );
            return Err(WalletError::InsufficientFunds { have: capped, need });
        }
        let strategy = match options.strategy {
            SelectionStrategy::All => SelectionStrategy::LargestFirst,
            other => other,
        };
        result = select_proofs(&sorted, need, strategy);
    }

    result.ok_or(WalletError::InsufficientFunds { have, need })
}

/// Select from `candidates` to cover `needed`. `None` if they cannot.
pub fn select_proofs(
    candidates: &[Proof],
    needed: u64,
    strategy: SelectionStrategy,
) -> Option<Selection> {
    if needed == 0 && strategy != SelectionStrategy::All {
        return Some(Selection {
            spend: Vec::new(),
            total: 0,
            change_needed: 0,
        });
    }

    match strategy {
        SelectionStrategy::All => select_all(candidates, needed),
        SelectionStrategy::LargestFirst => select_sorted(candidates, needed, true),
        SelectionStrategy::SmallestFirst => select_sorted(candidates, needed, false),
        SelectionStrategy::Random => select_random(candidates, needed),
        SelectionStrategy::Default => select_default(candidates, needed),
    }
}

fn select_all(candidates: &[Proof], needed: u64) -> Option<Selection> {
    let total = proofs_amount(candidates);
    if total < needed {
        return None;
    }
    Some(Selection {
        spend: candidates.to_vec(),
        total,
        change_needed: total - needed,
    })
}

fn select_sorted(candidates: &[Proof], needed: u64, largest_first: bool) -> Option<Selection> {
    let mut sorted: Vec<_> = candidates.to_vec();
    if largest_first {
        sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
    } else {
        sorted.sort_by(|a, b| a.amount.cmp(&b.amount));
    }
    accumulate(&sorted, needed)
}

fn select_random(candidates: &[Proof], needed: u64) -> Option<Selection> {
    use rand::seq::SliceRandom;
    let mut shuffled: Vec<_> = candidates.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    accumulate(&shuffled, needed)
}

fn select_default(candidates: &[Proof], needed: u64) -> Option<Selection> {
    // A single proof avoids a multi-input swap.
    if let Some(best) = candidates
        .iter()
        .filter(|p| p.amount >= needed)
        .min_by_key(|p| p.amount)
    {
        return Some(Selection {
            spend: vec![best.clone()],
            total: best.amount,
            change_needed: best.amount - needed,
        });
    }

    select_sorted(candidates, needed, true)
}

/// Accumulate proofs in order until the target is met.
fn accumulate(ordered: &[Proof], needed: u64) -> Option<Selection> {
    let mut spend = Vec::new();
    let mut total = 0u64;

    for proof in ordered {
        spend.push(proof.clone());
        total = total.saturating_add(proof.amount);
        if total >= needed {
            return Some(Selection {
                spend,
                total,
                change_needed: total - needed,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const M: &str = "https://mint.example";

    fn make_proofs(amounts: &[u64]) -> Vec<Proof> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, &amount)| Proof::new("00ab", amount, &format!("s{}", i), "02"))
            .collect()
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("largest".parse::<SelectionStrategy>(), Ok(SelectionStrategy::LargestFirst));
        assert_eq!("Smallest-First".parse::<SelectionStrategy>(), Ok(SelectionStrategy::SmallestFirst));
        assert!("biggest".parse::<SelectionStrategy>().is_err());
    }

    fn ledger_with(amounts: &[u64]) -> ProofLedger {
        let mut ledger = ProofLedger::new();
        ledger.add_proofs(M, &make_proofs(amounts), "ev1");
        ledger
    }

    #[test]
    fn test_single_proof_with_change() {
        let ledger = ledger_with(&[10]);
        let sel = select(&ledger, M, 7, 0, &SelectionOptions::default()).unwrap();
        assert_eq!(sel.spend.len(), 1);
        assert_eq!(sel.spend[0].amount, 10);
        assert_eq!(sel.change_needed, 3);
        assert_eq!(sel.change_denominations(), vec![1, 2]);
    }

    #[test]
    fn test_insufficient_funds_reports_have_and_need() {
        let ledger = ledger_with(&[10]);
        let err = select(&ledger, M, 15, 0, &SelectionOptions::default()).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { have: 10, need: 15 }));
    }

    #[test]
    fn test_fee_reserve_counts_toward_need() {
        let ledger = ledger_with(&[8, 2]);
        let sel = select(&ledger, M, 8, 1, &SelectionOptions::default()).unwrap();
        assert!(sel.total >= 9);
        let err = select(&ledger, M, 8, 3, &SelectionOptions::default()).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { have: 10, need: 11 }));
    }

    #[test]
    fn test_unknown_mint() {
        let ledger = ledger_with(&[10]);
        let err = select(&ledger, "https://other.example", 1, 0, &SelectionOptions::default())
            .unwrap_err();
        assert!(matches!(err, WalletError::UnknownMint(_)));
    }

    #[test]
    fn test_selection_is_sound_for_every_target() {
        let amounts = [1, 2, 4, 8, 16, 32, 5, 3];
        let ledger = ledger_with(&amounts);
        let balance: u64 = amounts.iter().sum();
        for strategy in [
            SelectionStrategy::Default,
            SelectionStrategy::LargestFirst,
            SelectionStrategy::SmallestFirst,
            SelectionStrategy::Random,
            SelectionStrategy::All,
        ] {
            let options = SelectionOptions { strategy, max_inputs: 64 };
            for target in 0..=balance + 5 {
                match select(&ledger, M, target, 0, &options) {
                    Ok(sel) => {
                        assert!(target <= balance);
                        assert!(sel.total >= target, "{:?} target {}", strategy, target);
                        assert_eq!(sel.total, proofs_amount(&sel.spend));
                        assert_eq!(sel.change_needed, sel.total - target);
                        assert!(sel.spend.iter().all(|p| ledger.contains(p)));
                    }
                    Err(WalletError::InsufficientFunds { have, need }) => {
                        assert!(target > balance);
                        assert_eq!(have, balance);
                        assert_eq!(need, target);
                    }
                    Err(e) => panic!("unexpected error {}", e),
                }
            }
        }
    }

    #[test]
    fn test_selection_does_not_mutate_ledger() {
        let ledger = ledger_with(&[10, 20]);
        let before = ledger.clone();
        select(&ledger, M, 25, 0, &SelectionOptions::default()).unwrap();
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_default_prefers_single_proof() {
        let proofs = make_proofs(&[50, 200, 100]);
        let sel = select_proofs(&proofs, 100, SelectionStrategy::Default).unwrap();
        assert_eq!(sel.spend.len(), 1);
        assert_eq!(sel.total, 100);
    }

    #[test]
    fn test_default_falls_back_to_accumulation() {
        let proofs = make_proofs(&[30, 40, 50]);
        let sel = select_proofs(&proofs, 110, SelectionStrategy::Default).unwrap();
        // No single proof >= 110, so largest-first: 50+40+30 = 120.
        assert_eq!(sel.spend.len(), 3);
        assert_eq!(sel.change_needed, 10);
    }

    #[test]
    fn test_smallest_first() {
        let proofs = make_proofs(&[50, 200, 100]);
        let sel = select_proofs(&proofs, 150, SelectionStrategy::SmallestFirst).unwrap();
        assert_eq!(sel.spend.len(), 2);
        assert_eq!(sel.total, 150);
    }

    #[test]
    fn test_zero_target_spends_nothing() {
        let proofs = make_proofs(&[1, 2]);
        let sel = select_proofs(&proofs, 0, SelectionStrategy::Default).unwrap();
        assert!(sel.spend.is_empty());
    }

    #[test]
    fn test_max_inputs_reselects_largest() {
        let ledger = ledger_with(&[1, 1, 1, 1, 1, 8]);
        let options = SelectionOptions {
            strategy: SelectionStrategy::SmallestFirst,
            max_inputs: 2,
        };
        let sel = select(&ledger, M, 9, 0, &options).unwrap();
        assert!(sel.spend.len() <= 2);
        assert_eq!(sel.total, 9);
    }

    #[test]
    fn test_max_inputs_too_tight() {
        let ledger = ledger_with(&[1, 1, 1, 1]);
        let options = SelectionOptions {
            strategy: SelectionStrategy::Default,
            max_inputs: 2,
        };
        let err = select(&ledger, M, 3, 0, &options).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { have: 2, need: 3 }));
    }

    #[test]
    fn test_overflow_protection() {
        let ledger = ledger_with(&[10]);
        let err = select(&ledger, M, u64::MAX, 1, &SelectionOptions::default()).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { have: 10, .. }));
    }
}
