//! Account seeding for simulations.

use bankrupt_common::{Currency, MinorUnits};
use bankrupt_ledger::{Account, LedgerStore, NewAccount};
use tracing::debug;

const OWNER_NAMES: [&str; 10] = [
    "alice", "bob", "carol", "dave", "erin", "frank", "grace", "heidi", "ivan", "judy",
];

/// Owner name for the `i`th simulated customer.
pub fn owner_name(i: usize) -> String {
    match OWNER_NAMES.get(i) {
        Some(name) => name.to_string(),
        // Generate names beyond the predefined list
        None => format!("customer_{}", i + 1),
    }
}

/// Creates the accounts a simulation transfers between.
pub struct AccountFactory;

impl AccountFactory {
    /// Create `count` USD accounts with `initial_balance` each, one per owner.
    pub async fn create_accounts<S: LedgerStore>(
        store: &S,
        count: usize,
        initial_balance: MinorUnits,
    ) -> anyhow::Result<Vec<Account>> {
        let mut accounts = Vec::with_capacity(count);

        for i in 0..count {
            let account = store
                .create_account(NewAccount::new(owner_name(i), Currency::usd(), initial_balance))
                .await?;
            debug!(account_id = %account.id, owner = %account.owner, "Seeded account");
            accounts.push(account);
        }

        Ok(accounts)
    }

    /// Sum of the current balances of `accounts`, read from the store.
    pub async fn total_balance<S: LedgerStore>(
        store: &S,
        accounts: &[Account],
    ) -> anyhow::Result<i128> {
        let mut total = 0i128;
        for account in accounts {
            total += i128::from(store.get_account(account.id).await?.balance);
        }
        Ok(total)
    }
}
