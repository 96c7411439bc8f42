use std::env;

fn main() {
    let version =
        env::var("CLASSIFY_VERSION").unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap());
    println!("cargo:rerun-if-env-changed=CLASSIFY_VERSION");
    println!("cargo:rustc-env=CLASSIFY_VERSION={version}");
}
