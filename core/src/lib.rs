pub mod clock;
pub mod config;
pub mod contribution_recorder;
pub mod due_payment_processor;
pub mod dues_materializer;
pub mod engine;
pub mod error;
pub mod event;
pub mod job;
pub mod ledger_audit;
pub mod non_contributor_resolver;
pub mod obligation_registry;
pub mod payment_reconciler;
pub mod scheduler;
pub mod store;
pub mod types;
