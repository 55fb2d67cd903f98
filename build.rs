fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/ffi");

    #[cfg(feature = "generate-header")]
    header::generate();

    #[cfg(not(feature = "generate-header"))]
    println!("cargo:warning=include/v2ray.h left as checked in (build with `generate-header` to regenerate).");
}

#[cfg(feature = "generate-header")]
mod header {
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    pub fn generate() {
        let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(error) => panic!("CARGO_MANIFEST_DIR unavailable: {error}"),
        };
        let output = crate_dir.join("include").join("v2ray.h");
        if let Some(parent) = output.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                panic!("failed to create {}: {error}", parent.display());
            }
        }

        let config = cbindgen::Config {
            language: cbindgen::Language::C,
            include_guard: Some("V2RAY_H".to_string()),
            cpp_compat: true,
            documentation: true,
            ..cbindgen::Config::default()
        };

        let bindings = match cbindgen::Builder::new()
            .with_crate(&crate_dir)
            .with_config(config)
            .generate()
        {
            Ok(bindings) => bindings,
            Err(error) => panic!("cbindgen failed: {error}"),
        };
        if bindings.write_to_file(&output) {
            println!("cargo:warning=regenerated {}", output.display());
        }
    }
}
