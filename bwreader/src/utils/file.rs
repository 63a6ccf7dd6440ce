pub mod reopen;
