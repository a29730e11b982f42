pub mod simulated_remote;
