// Load in the commands
pub(crate) mod add;
pub(crate) mod remove;
pub(crate) mod list;
pub(crate) mod clean;
