pub mod membership;
pub mod options;
pub mod poll;
pub mod results;
