#![allow(dead_code)]

pub use ferryman_test_utils::builders;
pub use ferryman_test_utils::fake_process;
pub use ferryman_test_utils::harness;
pub use ferryman_test_utils::{init_tracing, with_timeout};
