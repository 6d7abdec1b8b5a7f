// canonguard/src/commands/mod.rs
pub mod check;
pub mod inspect;
pub mod templates;
pub mod watch;
