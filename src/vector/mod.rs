//! Vector similarity primitives and ad hoc nearest-neighbour search.
//!
//! `find_similar` evaluates, in order:
//!
//! ```text
//! candidates
//!     │
//!     ├── has embedding?            (fragments without one are invisible)
//!     ├── exclude_owned?            (committed or claimed fragments dropped)
//!     ├── scope + predicates        (before any distance work)
//!     ├── cosine distance ≤ cutoff  (cutoff = (1 - min_similarity) * 2)
//!     │
//!     ▼
//! sort (distance, fragment id) → take limit
//! ```

mod distance;
mod filter;
mod index;

pub use distance::*;
pub use filter::*;
pub use index::*;
