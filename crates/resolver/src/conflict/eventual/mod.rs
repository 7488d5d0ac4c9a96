mod accept_winner;
mod merge_by_field;

pub use accept_winner::AcceptWinner;
pub use merge_by_field::MergeByField;
