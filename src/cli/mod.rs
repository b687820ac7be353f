pub mod probe;
pub mod run;
pub mod simulate;
