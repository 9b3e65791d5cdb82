//! Composable promises with combinators: a chainable single-assignment
//! future value plus `all`/`race`/`all_settled`/`any`/`delay`/`resolve`/
//! `reject`/`map` over collections of them.

pub mod combinators;
pub mod promise;
pub mod timer;

pub use combinators::{all, all_settled, any, delay, map, race, reject, resolve, Outcome};
pub use promise::{Promise, Resolver, Thenable};
pub use timer::{Timer, TokioTimer};
