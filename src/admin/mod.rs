//! Admin modes (spec §4.H): three one-shot modes sharing the Path/FID
//! layout (module A) and its sidecar conventions (module B) with the
//! daemon — bulk import of a pre-existing archive tree, FID rebind, and
//! maximum-sequence discovery.
//!
//! Grounded in `ct_import_one`/`ct_import_recurse`, `ct_rebind_one`/
//! `ct_rebind_list`/`ct_rebind`, and `ct_dir_level_max`/`ct_max_sequence`
//! of the original copytool.

pub mod import;
pub mod maxseq;
pub mod rebind;

pub use import::run_import;
pub use maxseq::{format_max_sequence, max_sequence};
pub use rebind::{rebind_list, rebind_pair, RebindReport};
