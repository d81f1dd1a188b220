mod util;

mod commit_tests;
mod incarnation_tests;
mod unwind_tests;
mod witness_tests;
