//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "Small F Prime XML tree shared by catalog and downstream tests."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Test fixtures: a two-component F Prime tree with a `Navigation` module
//! (`0x4A00`) and an `Imu` module (`0x4C00`).

use std::path::PathBuf;

use crate::loader::build;
use crate::standards::DataStandards;

/// Root of the fixture XML tree.
pub fn fprime_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fprime")
}

/// Catalog built from the fixture tree, prebuilt modules included.
///
/// # Panics
///
/// Panics if the fixture tree does not load, which is a test failure.
pub fn standards() -> DataStandards {
    match build(&fprime_root(), None, true) {
        Ok(standards) => standards,
        Err(err) => panic!("fixture catalog failed to load: {err}"),
    }
}
