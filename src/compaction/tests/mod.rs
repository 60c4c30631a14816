pub mod helpers;
mod tests_pick;
