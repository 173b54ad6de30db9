pub mod ledger;
pub mod notifier;
