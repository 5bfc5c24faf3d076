//! Simulation scenarios.
//!
//! A scenario turns the seeded accounts into a list of planned transfers.
//! Each transfer is sent by the owner of its source account.

use bankrupt_common::MinorUnits;
use bankrupt_ledger::Account;
use rand::Rng;

/// Transfer pattern to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Each account pays the next one, wrapping around.
    Pairwise,
    /// The first two accounts pay each other in alternating directions.
    /// Every pair of consecutive transfers locks the same rows in opposite
    /// roles.
    Alternating,
    /// Random distinct pairs and random amounts up to the configured amount.
    RandomMesh,
}

/// One transfer to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub from: Account,
    pub to: Account,
    pub amount: MinorUnits,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "pairwise" => Ok(Self::Pairwise),
            "alternating" => Ok(Self::Alternating),
            "random-mesh" => Ok(Self::RandomMesh),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pairwise => "pairwise",
            Self::Alternating => "alternating",
            Self::RandomMesh => "random-mesh",
        }
    }

    /// Plan `count` transfers over `accounts`.
    pub fn plan<R: Rng>(
        &self,
        accounts: &[Account],
        count: usize,
        amount: MinorUnits,
        rng: &mut R,
    ) -> anyhow::Result<Vec<PlannedTransfer>> {
        let n = accounts.len();
        if n < 2 {
            return Err(anyhow::anyhow!("Scenario {} needs at least 2 accounts", self.name()));
        }
        if amount <= 0 {
            return Err(anyhow::anyhow!("Transfer amount must be positive, got {}", amount));
        }

        let plan = (0..count)
            .map(|k| {
                let (from, to, amount) = match self {
                    Self::Pairwise => (k % n, (k + 1) % n, amount),
                    Self::Alternating if k % 2 == 0 => (0, 1, amount),
                    Self::Alternating => (1, 0, amount),
                    Self::RandomMesh => {
                        let from = rng.gen_range(0..n);
                        // Shift past `from` so the pair is always distinct
                        let to = (from + rng.gen_range(1..n)) % n;
                        (from, to, rng.gen_range(1..=amount))
                    }
                };
                PlannedTransfer {
                    from: accounts[from].clone(),
                    to: accounts[to].clone(),
                    amount,
                }
            })
            .collect();

        Ok(plan)
    }
}
