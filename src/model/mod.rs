//! Document model: queued actions, typed records, and the reconciled
//! dataset they produce.

pub mod action;
pub mod dataset;
pub mod entities;

pub use action::{ActionOp, FieldValue, Fields, PendingAction};
pub use dataset::Dataset;
pub use entities::{
    split_record, Account, BalanceSnapshot, Category, Collection, FlowKind, Frequency, Record,
    RecurringRule, Settings, Transaction, TxStatus, SETTINGS_DOC_ID,
};
