//! Process-lifetime services layered over the repositories.

pub mod change_log;
pub mod dao_service;
pub mod history;
pub mod mail;
pub mod notifications;
pub mod sequence;

pub use change_log::{ChangeAggregator, ChangeSummary, FlushOutcome, TRUNCATION_MARKER};
pub use dao_service::DaoService;
pub use history::HistoryStore;
pub use mail::{LogMailer, Mailer};
pub use notifications::NotificationCenter;
pub use sequence::SequenceGenerator;
