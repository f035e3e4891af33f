//! Placeholder crate root; all coverage for `plasm` lives under `tests/`.
