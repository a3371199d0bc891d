pub(crate) mod collect;

pub(crate) use collect::{Report, collect};
