// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

const SOURCES: [(&str, shaderc::ShaderKind); 2] = [
    ("mesh.vert", shaderc::ShaderKind::Vertex),
    ("mesh.frag", shaderc::ShaderKind::Fragment),
];

fn main() {
    let manifest = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let src_dir = manifest.join("../../shaders");
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind) in SOURCES {
        let path = src_dir.join(name);
        println!("cargo:rerun-if-changed={}", path.display());
        let src = fs::read_to_string(&path).unwrap();
        let spv = comp
            .compile_into_spirv(&src, kind, name, "main", Some(&opts))
            .unwrap();
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    // The crate reads the compiled shaders from here by default.
    println!("cargo:rustc-env=EMBER_SHADER_DIR={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");
}
