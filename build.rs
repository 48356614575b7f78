use std::env;

fn main() {
    // `cfg(target_arch)` inside a build script describes the host, so ask cargo for the target.
    let registers_file = match env::var("CARGO_CFG_TARGET_ARCH").as_deref() {
        Ok("x86_64") => "src/registers/x64.S",
        Ok("aarch64") => "src/registers/aarch64.S",
        _ => return,
    };
    println!("cargo:rerun-if-changed={}", registers_file);
    cc::Build::new().file(registers_file).compile("registers");
}
