//! Insurer-specific flows. Each module exposes `CODE` and `flow(&Services)`;
//! the resolver registers them in `FlowResolver::with_defaults`.

pub mod abhi;
pub mod insurer_a;
pub mod insurer_b;
