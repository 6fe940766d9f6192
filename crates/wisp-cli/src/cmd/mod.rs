pub mod run_local;
