mod no_retry;
mod refresh_revision;
mod reject_on_conflict;
mod retry_with_new_identity;

pub use no_retry::NoRetry;
pub use refresh_revision::RefreshRevisionAndRetry;
pub use reject_on_conflict::RejectOnConflict;
pub use retry_with_new_identity::RetryWithNewIdentity;
