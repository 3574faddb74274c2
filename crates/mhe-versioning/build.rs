//! ---
//! mhe_section: "14-versioning"
//! mhe_subsection: "build"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Build script embedding git and cargo metadata."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Outside a git checkout vergen falls back to placeholder values instead of failing.
    EmitBuilder::builder().all_build().all_cargo().all_git().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=MHE_BUILD_NUMBER");
    Ok(())
}
