pub mod membership;
pub mod poll;
pub mod vote;
