// 每個 predicate 都是 fn(&Fragment) -> Verdict，看不懂的文字一律回 Safe

mod arithmetic;
mod concurrency;
mod memory;
mod termination;

pub use arithmetic::{division_by_zero, integer_overflow, unsafe_cast};
pub use concurrency::data_race;
pub use memory::{buffer_overflow, memory_leak, null_deref};
pub use termination::unbounded_loop;
